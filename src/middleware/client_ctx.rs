//! Client context passed to routes.
//!
//! Authentication is an external collaborator: a trusted reverse proxy
//! terminates the session and forwards the caller's identity in the
//! `X-User-Id` and `X-User-Role` headers. This extractor only reads them;
//! absent headers mean an anonymous caller.

use crate::error::ModerationError;
use actix_utils::future::{ok, Ready};
use actix_web::dev::Payload;
use actix_web::{Error, FromRequest, HttpRequest};

#[derive(Clone, Debug, Default)]
pub struct ClientCtx {
    user_id: Option<i32>,
    admin: bool,
}

impl ClientCtx {
    /// Returns either the user's id or None.
    pub fn get_id(&self) -> Option<i32> {
        self.user_id
    }

    pub fn is_user(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Gate for admin-only mutations; yields the actor id for the audit
    /// trail.
    pub fn require_admin(&self) -> Result<i32, ModerationError> {
        match (self.user_id, self.admin) {
            (Some(id), true) => Ok(id),
            _ => Err(ModerationError::Permission),
        }
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

impl FromRequest for ClientCtx {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user_id = header_str(req, "X-User-Id").and_then(|v| v.parse::<i32>().ok());
        let admin = user_id.is_some()
            && header_str(req, "X-User-Role").map_or(false, |role| role.eq_ignore_ascii_case("admin"));
        ok(ClientCtx { user_id, admin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_rt::test]
    async fn anonymous_requests_have_no_identity() {
        let req = TestRequest::default().to_http_request();
        let ctx = ClientCtx::extract(&req).await.unwrap();
        assert!(!ctx.is_user());
        assert!(ctx.require_admin().is_err());
    }

    #[actix_rt::test]
    async fn admin_role_requires_an_identity() {
        let req = TestRequest::default()
            .insert_header(("X-User-Role", "admin"))
            .to_http_request();
        let ctx = ClientCtx::extract(&req).await.unwrap();
        assert!(ctx.require_admin().is_err());

        let req = TestRequest::default()
            .insert_header(("X-User-Id", "7"))
            .insert_header(("X-User-Role", "admin"))
            .to_http_request();
        let ctx = ClientCtx::extract(&req).await.unwrap();
        assert_eq!(ctx.require_admin().unwrap(), 7);
    }

    #[actix_rt::test]
    async fn plain_users_are_not_admins() {
        let req = TestRequest::default()
            .insert_header(("X-User-Id", "7"))
            .to_http_request();
        let ctx = ClientCtx::extract(&req).await.unwrap();
        assert!(ctx.is_user());
        assert!(!ctx.is_admin());
    }
}

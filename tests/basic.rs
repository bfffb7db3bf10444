#[cfg(test)]
mod tests {
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn test_status_get() {
        let mut app = test::init_service(App::new().service(modgate::web::view_status)).await;
        let req = test::TestRequest::default().uri("/status").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_rt::test]
    async fn test_admin_routes_refuse_anonymous_callers() {
        let mut app = test::init_service(
            App::new().service(modgate::web::filter_admin::view_filters),
        )
        .await;
        let req = test::TestRequest::default().uri("/admin/filters").to_request();
        let resp = test::call_service(&mut app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::FORBIDDEN);
    }
}

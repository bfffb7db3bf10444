use actix_web::{get, HttpResponse, Responder};

pub mod filter_admin;
pub mod queue;
pub mod report;
pub mod reputation_admin;
pub mod submission;

/// Configures the web app
///
/// @see https://docs.rs/actix-web/4.0.1/actix_web/struct.App.html#method.configure
pub fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_status)
        .service(submission::submit_post)
        .service(submission::submit_thread)
        .service(submission::view_quota)
        // Literal segments must land before the {id} routes.
        .service(filter_admin::test_filters)
        .service(filter_admin::view_filters)
        .service(filter_admin::create_filter)
        .service(filter_admin::update_filter)
        .service(filter_admin::delete_filter)
        .service(reputation_admin::view_ip_bans)
        .service(reputation_admin::create_ip_ban)
        .service(reputation_admin::update_ip_ban)
        .service(reputation_admin::delete_ip_ban)
        .service(reputation_admin::view_whitelist)
        .service(reputation_admin::create_whitelist_entry)
        .service(reputation_admin::update_whitelist_entry)
        .service(reputation_admin::delete_whitelist_entry)
        .service(reputation_admin::block_anon_session)
        .service(reputation_admin::unblock_anon_session)
        .service(queue::approve_content)
        .service(queue::reject_content)
        .service(queue::override_content)
        .service(report::create_report)
        .service(report::create_appeal)
        .service(report::view_report)
        .service(report::resolve_report)
        .service(report::dismiss_report)
        .service(report::close_report)
        .service(report::restore_content)
        .service(report::delete_reported_content)
        .service(report::auto_dismiss_report)
        .service(report::view_task_purge);
}

#[get("/status")]
pub async fn view_status() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

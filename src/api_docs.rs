use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health_check,
        api::auth::login,
        api::peers::list_hosts,
        api::peers::review_host,
        api::peers::submit_host,
    ),
    tags(
        (name = "mnet-peers", description = "Peer host registry API")
    )
)]
pub struct ApiDoc;

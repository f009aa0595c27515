use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::restyle::handler::restyle,
    ),
    components(
        schemas(
            crate::error::ProblemDetails,
            crate::features::health::HealthResponse,
            crate::features::restyle::RestyleFormDoc,
            crate::features::restyle::ProcessingFailedBody,
        )
    ),
    tags(
        (name = "Health", description = "Health APIs"),
        (name = "Restyle", description = "Image restyle APIs"),
    ),
    info(
        title = "Restyle Backend API",
        version = "0.1.0",
        description = "Room image restyle test service (Axum)"
    )
)]
pub struct ApiDoc;

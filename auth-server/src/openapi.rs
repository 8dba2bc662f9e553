use crate::api::{admin, health, oauth, well_known};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0";
pub(crate) const WELL_KNOWN_TAG: &str = "Discovery";
pub(crate) const ADMIN_TAG: &str = "Administration";

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::handlers::health_check,
        health::handlers::ready_check,
        health::handlers::healthy_check,
        oauth::authorize::authorize,
        oauth::authorize::decide,
        oauth::handlers::token,
        oauth::handlers::introspect,
        oauth::handlers::revoke,
        oauth::handlers::userinfo,
        well_known::jwks,
        well_known::openid_configuration,
        admin::rotate_client_secret,
    ),
    components(schemas(
        oauth::models::TokenRequest,
        oauth::models::TokenResponse,
        oauth::models::TokenHintRequest,
        oauth::models::ConsentForm,
        oauth::models::IntrospectionResponse,
        oauth::models::UserInfoResponse,
        oauth::models::OAuthError,
        well_known::ProviderMetadata,
        admin::RotatedSecret,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Authorization, token and userinfo endpoints"),
        (name = WELL_KNOWN_TAG, description = "Key set and provider metadata"),
        (name = ADMIN_TAG, description = "Client administration"),
    ),
    info(
        title = "Authorization Server API",
        description = "OAuth 2.0 / OpenID Connect authorization server",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

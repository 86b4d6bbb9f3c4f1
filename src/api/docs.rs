// =============================================================================
// API Documentation — OpenAPI document and viewer pages
// =============================================================================
//
// `/openapi.json` serves the document utoipa derives from the handler
// annotations. `/docs` (Swagger UI, vendored assets) and `/redoc` point at
// it. The whole router sits behind the Basic-auth documentation gate;
// browsers forward the cached Basic credentials when the viewers fetch the
// schema.
// =============================================================================

use std::sync::Arc;

use axum::{middleware, Router};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_redoc::{Redoc, Servable};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::auth::require_docs_login;
use crate::api::rest;
use crate::app_state::AppState;
use crate::error::API_KEY_HEADER;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MT5 Gateway API",
        description = "HTTP access to trading-terminal market data and order functions."
    ),
    paths(
        rest::health,
        rest::auth_status,
        rest::list_symbols,
        rest::symbol_info,
        rest::tickers,
        rest::tickers_by_count,
        rest::percent_change,
        rest::positions,
        rest::open_position,
        rest::close_position,
        rest::modify_position,
    ),
    tags(
        (name = "Status", description = "Health and authentication status"),
        (name = "Market Data", description = "Symbols, bars and percent-change snapshots"),
        (name = "Trading", description = "Open, close and modify positions")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the API-key header scheme (used by market-data and trading
/// routes) and the Basic scheme (used by the documentation itself).
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                API_KEY_HEADER,
                "Gateway API key. `Authorization` is accepted as a fallback header.",
            ))),
        );
        components.add_security_scheme(
            "docs_basic",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Basic).build()),
        );
    }
}

/// Swagger UI, ReDoc and the raw document, all behind the docs login.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .merge(Redoc::with_url("/redoc", ApiDoc::openapi()))
        .route_layer(middleware::from_fn_with_state(state, require_docs_login))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_versioned_routes_and_schemes() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();

        for path in [
            "/api/v1/market-data/symbols",
            "/api/v1/market-data/tickers-by-count",
            "/api/v1/trading/open-position",
            "/auth-status",
        ] {
            assert!(json["paths"].get(path).is_some(), "missing {path}");
        }
        assert!(json["components"]["securitySchemes"].get("api_key").is_some());
        assert!(json["components"]["securitySchemes"].get("docs_basic").is_some());
    }
}

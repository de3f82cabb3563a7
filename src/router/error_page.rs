//! Error page selection and the last-resort fallback page

use std::sync::Arc;

use log::{error, warn};
use serde_json::{json, Map};

use crate::core::{ErrorCode, RouterError, RouterResult};
use crate::utils::encoding::escape_html;

use super::Router;

/// User-facing message for a display code
pub fn error_message(code: ErrorCode, route: &str) -> String {
    match code {
        ErrorCode::NotFound => format!("'{route}' page could not be found."),
        ErrorCode::ServiceUnavailable => "Please check your network connection.".to_string(),
        ErrorCode::Forbidden => "You do not have permission to access this page.".to_string(),
        ErrorCode::Internal => "The page could not be loaded.".to_string(),
    }
}

/// Self-contained markup shown when even the error view cannot render
pub fn fallback_page(code: ErrorCode, message: &str) -> String {
    format!(
        "<div class=\"fallback-error-page\">\
         <h1>{code}</h1>\
         <p>{}</p>\
         <a href=\"#/\">Go home</a>\
         </div>",
        escape_html(message)
    )
}

impl Router {
    /// Show the page for a failed navigation; always leaves something rendered.
    pub(crate) async fn handle_route_error(&self, route: &str, err: RouterError) -> ErrorCode {
        let code = err.display_code();
        error!("Route loading error for {route}: {err}");

        if self.config.router.enable_error_reporting {
            self.report_error(route, code, &err);
        }

        let message = error_message(code, route);
        if let Err(page_err) = self.show_error_page(code, &message).await {
            warn!("Error page for {code} could not be rendered: {page_err}");
            self.document.render_fallback(&fallback_page(code, &message));
        }
        code
    }

    async fn show_error_page(&self, code: ErrorCode, message: &str) -> RouterResult<()> {
        let view = code.view_route();
        let unit = self.loader.build_renderable_unit(view).await?;
        let unit = if code == ErrorCode::NotFound {
            unit
        } else {
            let mut overlay = Map::new();
            overlay.insert("errorCode".into(), json!(code.as_u16()));
            overlay.insert("errorMessage".into(), json!(message));
            overlay.insert("showRetry".into(), json!(true));
            overlay.insert("showGoHome".into(), json!(true));
            Arc::new(unit.with_overlay(overlay))
        };
        self.render_component_with_transition(unit, view).await
    }

    fn report_error(&self, route: &str, code: ErrorCode, err: &RouterError) {
        let location = self.host.location();
        let url = format!(
            "{}{}{}{}",
            location.origin, location.pathname, location.search, location.hash
        );
        let message = err.to_string();
        error!(
            route = route,
            code = code.as_u16(),
            url = url.as_str(),
            environment = self.config.router.environment.as_str(),
            mode = self.mode_name();
            "Route error reported: {message}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            error_message(ErrorCode::NotFound, "ghost"),
            "'ghost' page could not be found."
        );
        assert_eq!(
            error_message(ErrorCode::ServiceUnavailable, "x"),
            "Please check your network connection."
        );
    }

    #[test]
    fn test_fallback_escapes_text() {
        let html = fallback_page(ErrorCode::NotFound, "'<script>' page could not be found.");
        assert!(html.contains("<h1>404</h1>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}

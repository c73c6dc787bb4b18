//! Output formatting. Results go to stdout as pretty JSON, except the route
//! table which is aligned text.

use querygate::{ErrorEnvelope, GatewayError, RouteDescriptor};
use serde::Serialize;

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn routes(routes: &[RouteDescriptor]) -> String {
    let width = routes
        .iter()
        .map(|r| r.method.as_str().len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for route in routes {
        let action = route.action.as_deref().unwrap_or("list");
        out.push_str(&format!(
            "{:<width$}  {}  ({})\n",
            route.method.as_str(),
            route.path,
            action,
            width = width
        ));
    }
    out
}

pub fn error(err: &GatewayError) -> String {
    let envelope = ErrorEnvelope::from(err);
    serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| format!("Error: {}", err))
}

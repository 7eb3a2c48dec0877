//! Resolution of `@scope/name` registry package identifiers into a concrete
//! server endpoint (§4.2 `registerServerFromRegistry`).

use async_trait::async_trait;
use zypher_types::ServerEndpoint;

#[async_trait]
pub trait RegistryResolver: Send + Sync {
    async fn resolve(&self, package_identifier: &str) -> Result<ServerEndpoint, String>;
}

/// Parses and validates the `@scope/name` shape; resolution itself is left
/// to the collaborator since it requires a real registry lookup.
pub fn parse_package_identifier(package_identifier: &str) -> Result<(&str, &str), String> {
    let rest = package_identifier
        .strip_prefix('@')
        .ok_or_else(|| format!("missing leading '@': {package_identifier}"))?;
    let (scope, name) = rest
        .split_once('/')
        .ok_or_else(|| format!("missing '/' separator: {package_identifier}"))?;
    if scope.is_empty() || name.is_empty() {
        return Err(format!("empty scope or name: {package_identifier}"));
    }
    Ok((scope, name))
}

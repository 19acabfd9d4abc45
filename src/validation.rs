//! Input validation and sanitization
//!
//! Everything here runs before any OS command is built. A rejected input never
//! reaches the command runner.

use crate::error::{VpnctlError, VpnctlResult};
use crate::model::ProfileSpec;

/// Maximum length for profile names (RAS phonebook entry limit)
const MAX_PROFILE_NAME_LEN: usize = 256;

/// Maximum length for server addresses
const MAX_SERVER_ADDRESS_LEN: usize = 255;

/// Maximum length for messages shown to users
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Maximum length for operation details kept for display
pub const MAX_DETAILS_LEN: usize = 4000;

/// Validate a profile name
///
/// Names are free text to the OS, but they must be non-empty and must not
/// contain control characters that would break the command line.
pub fn validate_profile_name(name: &str) -> VpnctlResult<()> {
    if name.trim().is_empty() {
        return Err(VpnctlError::InvalidParameter("Name is required.".to_string()));
    }

    if name.len() > MAX_PROFILE_NAME_LEN {
        return Err(VpnctlError::InvalidParameter(format!(
            "Name too long (max {} characters)",
            MAX_PROFILE_NAME_LEN
        )));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(VpnctlError::InvalidParameter(
            "Name contains invalid control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a server address (hostname or IP, optionally with port)
pub fn validate_server_address(address: &str) -> VpnctlResult<()> {
    let address = address.trim();
    if address.is_empty() {
        return Err(VpnctlError::InvalidParameter(
            "Server address is required.".to_string(),
        ));
    }

    if address.len() > MAX_SERVER_ADDRESS_LEN {
        return Err(VpnctlError::InvalidParameter(
            "Server address too long".to_string(),
        ));
    }

    if address.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(VpnctlError::InvalidParameter(
            "Server address cannot contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a full create/update spec
pub fn validate_profile_spec(spec: &ProfileSpec) -> VpnctlResult<()> {
    validate_profile_name(&spec.name)?;
    validate_server_address(&spec.server_address)?;

    if !spec.tunnel_type.is_supported() {
        return Err(VpnctlError::InvalidParameter(format!(
            "Unsupported tunnel type: {}",
            spec.tunnel_type
        )));
    }

    Ok(())
}

/// Quote a value as a single-quoted PowerShell literal
///
/// Inside single quotes PowerShell performs no expansion; the only special
/// character is `'` itself, escaped by doubling.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Sanitize error messages to keep user-facing text short
pub fn sanitize_error_message(message: &str) -> String {
    truncate_with_marker(message.trim(), MAX_ERROR_MESSAGE_LEN)
}

/// Truncate on a char boundary, appending a marker when text was cut
pub fn truncate_with_marker(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let mut truncated = text[..end].to_string();
    truncated.push_str("... (truncated)");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TunnelType;

    #[test]
    fn test_profile_name_validation() {
        assert!(validate_profile_name("Office VPN").is_ok());
        assert!(validate_profile_name("VPN-A (backup)").is_ok());
        assert!(validate_profile_name("Büro").is_ok());

        assert!(validate_profile_name("").is_err());
        assert!(validate_profile_name("   ").is_err());
        assert!(validate_profile_name("name\nwith newline").is_err());
        assert!(validate_profile_name(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_server_address_validation() {
        assert!(validate_server_address("vpn.example.com").is_ok());
        assert!(validate_server_address("203.0.113.7").is_ok());
        assert!(validate_server_address("vpn.example.com:443").is_ok());

        assert!(validate_server_address("").is_err());
        assert!(validate_server_address("vpn example.com").is_err());
        assert!(validate_server_address("vpn\t.com").is_err());
    }

    #[test]
    fn test_spec_rejects_unknown_tunnel_type() {
        let spec = ProfileSpec::new("T1", "vpn.example.com", TunnelType::Other("Wireguard".to_string()));
        let err = validate_profile_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("Unsupported tunnel type"));

        let spec = ProfileSpec::new("T1", "vpn.example.com", TunnelType::Ikev2);
        assert!(validate_profile_spec(&spec).is_ok());
    }

    #[test]
    fn test_ps_quote_escapes_single_quotes() {
        assert_eq!(ps_quote("Office"), "'Office'");
        assert_eq!(ps_quote("Bob's VPN"), "'Bob''s VPN'");
        // Expansion characters are inert inside single quotes
        assert_eq!(ps_quote("$(calc)"), "'$(calc)'");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ä".repeat(10);
        let truncated = truncate_with_marker(&text, 5);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.starts_with("ää"));

        assert_eq!(truncate_with_marker("short", 10), "short");
    }
}

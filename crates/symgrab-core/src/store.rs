//! Symbol-store path convention.
//!
//! A module's PDB lives at `{base}/{name}/{GUID}{age}/{name}` where the
//! middle segment is the 32-digit uppercase GUID followed by the hex age.

use url::Url;

use symgrab_types::DebugIdentity;

use crate::error::SymgrabError;

/// Public Microsoft symbol server.
pub const DEFAULT_SYMBOL_SERVER: &str = "https://msdl.microsoft.com/download/symbols";

/// A remote symbol store addressed by the GUID+age convention.
#[derive(Debug, Clone)]
pub struct SymbolStore {
    base: String,
}

impl SymbolStore {
    pub fn new(base: &str) -> Result<Self, SymgrabError> {
        let url = Url::parse(base).map_err(|_| SymgrabError::InvalidUrl(base.to_string()))?;
        Ok(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// The store path of the PDB matching `identity`, or `None` when the
    /// module carried no debug identity.
    pub fn resource_url(&self, identity: &DebugIdentity) -> Option<String> {
        if identity.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}/{}/{}",
            self.base,
            identity.pdb_name,
            identity.identity_folder(),
            identity.pdb_name
        ))
    }
}

impl Default for SymbolStore {
    fn default() -> Self {
        Self {
            base: DEFAULT_SYMBOL_SERVER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn builds_guid_age_path() {
        let store = SymbolStore::default();
        let identity = DebugIdentity::new(
            "ntdll.pdb".into(),
            "A".into(),
            Uuid::parse_str("497b72f6-390a-44fc-878e-5a2d63b6cc4b").unwrap(),
        );
        assert_eq!(
            store.resource_url(&identity).unwrap(),
            "https://msdl.microsoft.com/download/symbols/ntdll.pdb/497B72F6390A44FC878E5A2D63B6CC4BA/ntdll.pdb"
        );
    }

    #[test]
    fn empty_identity_has_no_url() {
        let store = SymbolStore::default();
        assert!(store.resource_url(&DebugIdentity::default()).is_none());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let store = SymbolStore::new("https://symbols.example.com/store/").unwrap();
        let identity = DebugIdentity::new("a.pdb".into(), "1".into(), Uuid::nil());
        let url = store.resource_url(&identity).unwrap();
        assert!(url.starts_with("https://symbols.example.com/store/a.pdb/"));
        assert!(!url.contains("//a.pdb"));
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(matches!(
            SymbolStore::new("not a url"),
            Err(SymgrabError::InvalidUrl(_))
        ));
    }
}

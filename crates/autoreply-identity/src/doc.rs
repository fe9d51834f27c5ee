//! DID document model

use serde::{Deserialize, Serialize};
use url::Url;

/// Service entry type for a personal data server
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// A DID document, as served by the PLC directory or a did:web host.
///
/// Only the fields the resolver consumes are modelled; everything else in the
/// document is ignored on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: String,

    #[serde(rename = "alsoKnownAs", default, skip_serializing_if = "Vec::is_empty")]
    pub also_known_as: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
}

/// A service entry inside a DID document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub service_type: String,

    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl DidDocument {
    /// Locate the PDS endpoint advertised by this document.
    ///
    /// Matches by service type, falling back to the conventional
    /// `#atproto_pds` fragment id.
    pub fn pds_endpoint(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| s.service_type == PDS_SERVICE_TYPE || s.id.ends_with("#atproto_pds"))
            .and_then(|s| Url::parse(&s.service_endpoint).ok())
    }

    /// True when the document claims the given handle under `alsoKnownAs`
    pub fn claims_handle(&self, handle: &str) -> bool {
        let expected = format!("at://{handle}");
        self.also_known_as.iter().any(|aka| aka == &expected)
    }

    /// The handle this document advertises, if any
    pub fn handle(&self) -> Option<&str> {
        self.also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
    }
}

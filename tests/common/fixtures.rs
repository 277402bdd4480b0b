//! Catalog entries, acquisitions and accounts used across scenarios

use book_borrow::acquisition::{AcquisitionRelation, IndirectAcquisition};
use book_borrow::types::{
    AccountAuth, AccountCredentials, AdobeCredentials, AdobePostActivation, Cookie,
};
use book_borrow::{Acquisition, AccountId, AccountState, Availability, FeedEntry, MimeType};
use chrono::{TimeZone, Utc};
use url::Url;

/// Parse a URL
pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// A direct acquisition of `mime_type` at `href`
pub fn acquisition(href: &str, mime_type: MimeType) -> Acquisition {
    Acquisition {
        relation: AcquisitionRelation::Generic,
        href: url(href),
        mime_type,
        indirect: vec![],
    }
}

/// An acquisition at `href` of `mime_type` that leads through `chain`
pub fn indirect_acquisition(
    relation: AcquisitionRelation,
    href: &str,
    mime_type: MimeType,
    chain: &[MimeType],
) -> Acquisition {
    let indirect = chain.iter().rev().fold(Vec::new(), |inner, m| {
        vec![IndirectAcquisition {
            mime_type: m.clone(),
            indirect: inner,
        }]
    });
    Acquisition {
        relation,
        href: url(href),
        mime_type,
        indirect,
    }
}

/// A catalog entry with the given acquisitions
pub fn feed_entry(id: &str, availability: Availability, acquisitions: Vec<Acquisition>) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        title: format!("Title of {id}"),
        authors: vec!["A. Writer".to_string()],
        updated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        availability,
        acquisitions,
    }
}

/// Account signed in with basic authentication
pub fn basic_account() -> AccountState {
    AccountState::logged_in(
        AccountId::generate(),
        AccountCredentials {
            auth: AccountAuth::Basic {
                username: "2391".to_string(),
                password: "0000".to_string(),
            },
            adobe: None,
        },
    )
}

/// Account with Adobe credentials; `activated` controls the device tier
pub fn adobe_account(activated: bool) -> AccountState {
    AccountState::logged_in(
        AccountId::generate(),
        AccountCredentials {
            auth: AccountAuth::Basic {
                username: "2391".to_string(),
                password: "0000".to_string(),
            },
            adobe: Some(AdobeCredentials {
                vendor_id: "vendor".to_string(),
                client_token: "client-token".to_string(),
                post_activation: activated.then(|| AdobePostActivation {
                    device_id: "device".to_string(),
                    user_id: "user".to_string(),
                }),
            }),
        },
    )
}

/// Account signed in through a SAML identity provider
pub fn saml_account() -> AccountState {
    AccountState::logged_in(
        AccountId::generate(),
        AccountCredentials {
            auth: AccountAuth::Saml2 {
                access_token: "saml-token".to_string(),
                cookies: vec![Cookie {
                    name: "idp_session".to_string(),
                    value: "abc".to_string(),
                }],
            },
            adobe: None,
        },
    )
}

/// Small fake EPUB body
pub const EPUB_BODY: &[u8] = b"PK\x03\x04 fake epub container";

/// Small fake PDF body
pub const PDF_BODY: &[u8] = b"%PDF-1.7 fake";

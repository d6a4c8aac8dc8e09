//! Credential injection into headers, query parameters or form fields

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Secrets per auth scheme, in the order they are applied to target fields
pub type Credentials = IndexMap<String, Vec<String>>;

/// Reference from a request spec to a credentials entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthRef {
    /// A bare scheme name; its secrets become HTTP basic credentials
    Scheme(String),
    /// A scheme name plus the fields its secrets are written to
    Descriptor(AuthDescriptor),
}

/// Structured auth reference: `name` plus one of `headers`, `params` or `postdata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postdata: Option<Vec<String>>,
}

/// Values derived from credentials, grouped by parameter class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthMaterial {
    pub headers: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
    pub data: IndexMap<String, String>,
    pub basic: Option<(String, Option<String>)>,
}

impl AuthMaterial {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.params.is_empty()
            && self.data.is_empty()
            && self.basic.is_none()
    }
}

/// Zip the scheme's secrets positionally onto the named fields
///
/// A scheme missing from `creds` yields no values. Surplus secrets are
/// dropped and surplus fields stay unset.
pub fn materialize(auth: &AuthRef, creds: &Credentials) -> AuthMaterial {
    let mut material = AuthMaterial::default();

    match auth {
        AuthRef::Scheme(name) => {
            if let Some(secrets) = creds.get(name) {
                let mut secrets = secrets.iter().cloned();
                if let Some(user) = secrets.next() {
                    material.basic = Some((user, secrets.next()));
                }
            }
        }
        AuthRef::Descriptor(desc) => {
            let Some(secrets) = creds.get(&desc.name) else {
                return material;
            };
            // One target class per descriptor, checked in this order
            let (fields, target) = if let Some(fields) = &desc.headers {
                (fields, &mut material.headers)
            } else if let Some(fields) = &desc.params {
                (fields, &mut material.params)
            } else if let Some(fields) = &desc.postdata {
                (fields, &mut material.data)
            } else {
                return material;
            };
            for (field, secret) in fields.iter().zip(secrets) {
                target.insert(field.clone(), secret.clone());
            }
        }
    }

    material
}

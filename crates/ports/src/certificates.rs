//! Certificate authority trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::sync::lock;

/// An issued or pending certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub arn: String,
    pub domain: String,
    pub body: String,
}

#[async_trait]
pub trait Certificates: Send + Sync {
    /// Requests a DNS-validated certificate for exactly `domain` and
    /// returns its ARN.
    async fn request(&self, domain: &str) -> Result<String>;

    async fn get(&self, arn: &str) -> Result<Certificate>;
}

#[derive(Debug, Default)]
struct InMemoryCertificatesState {
    certificates: BTreeMap<String, Certificate>,
    next_id: u32,
    fail_request: bool,
}

/// In-memory certificate authority for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCertificates {
    state: Arc<Mutex<InMemoryCertificatesState>>,
}

impl InMemoryCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_request(&self, fail: bool) {
        lock(&self.state).fail_request = fail;
    }

    pub fn certificate_count(&self) -> usize {
        lock(&self.state).certificates.len()
    }
}

#[async_trait]
impl Certificates for InMemoryCertificates {
    async fn request(&self, domain: &str) -> Result<String> {
        let mut state = lock(&self.state);
        if state.fail_request {
            return Err(PortError::Certificates(format!(
                "certificate request for {domain} rejected"
            )));
        }
        state.next_id += 1;
        let arn = format!("arn:aws:acm:us-east-1:000000000000:certificate/{:04}", state.next_id);
        state.certificates.insert(
            arn.clone(),
            Certificate {
                arn: arn.clone(),
                domain: domain.to_string(),
                body: format!("-----BEGIN CERTIFICATE-----\n{domain}\n-----END CERTIFICATE-----"),
            },
        );
        Ok(arn)
    }

    async fn get(&self, arn: &str) -> Result<Certificate> {
        lock(&self.state)
            .certificates
            .get(arn)
            .cloned()
            .ok_or_else(|| PortError::Certificates(format!("no such certificate: {arn}")))
    }
}

//! Self-registration with the service registry.
//!
//! The client registers the instance, marks it `UP`, renews the lease on a
//! fixed interval and deregisters when the process shuts down. A renewal
//! answered with `404` means the registry forgot the instance (restart,
//! expiry, `DOWN`); the client then registers again.

use microservices_registry::{InstanceStatus, Registration};
use microservices_web::RegisterRequest;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors talking to the registry.
#[derive(Error, Debug)]
pub enum RegistryClientError {
    /// The request could not be sent or its response read.
    #[error("Registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The registry answered with an unexpected status.
    #[error("Registry answered {status} for {url}")]
    Status {
        /// HTTP status received.
        status: u16,
        /// Request URL.
        url: String,
    },
}

/// Outcome of a lease renewal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Renewal {
    /// Lease renewed.
    Renewed,
    /// The registry does not know the instance; register again.
    NotRegistered,
}

/// HTTP client for one instance's registration.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    registration: Registration,
}

impl RegistryClient {
    /// Client for `registration` against the registry at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, registration: Registration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            registration,
        }
    }

    /// Registration this client announces.
    #[must_use]
    pub const fn registration(&self) -> &Registration {
        &self.registration
    }

    fn app_url(&self) -> String {
        format!("{}/eureka/apps/{}", self.base_url, self.registration.app)
    }

    fn instance_url(&self) -> String {
        format!("{}/{}", self.app_url(), self.registration.instance_id)
    }

    /// Register the instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable or rejects the
    /// registration.
    pub async fn register(&self) -> Result<(), RegistryClientError> {
        let url = self.app_url();
        let body = RegisterRequest {
            instance: self.registration.clone(),
        };
        let response = self.http.post(&url).json(&body).send().await?;
        expect_success(response.status(), url)
    }

    /// Change the instance status.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable or rejects the change.
    pub async fn set_status(&self, status: InstanceStatus) -> Result<(), RegistryClientError> {
        let url = format!("{}/status", self.instance_url());
        let response = self
            .http
            .put(&url)
            .query(&[("value", status.as_str())])
            .send()
            .await?;
        expect_success(response.status(), url)
    }

    /// Renew the lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable or answers with
    /// anything but success or `404`.
    pub async fn renew(&self) -> Result<Renewal, RegistryClientError> {
        let url = self.instance_url();
        let response = self.http.put(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Renewal::NotRegistered);
        }
        expect_success(response.status(), url).map(|()| Renewal::Renewed)
    }

    /// Remove the instance from the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unreachable or answers with
    /// anything but success or `404`.
    pub async fn deregister(&self) -> Result<(), RegistryClientError> {
        let url = self.instance_url();
        let response = self.http.delete(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response.status(), url)
    }

    /// Register and mark the instance `UP`.
    ///
    /// # Errors
    ///
    /// Returns the first failing request's error.
    pub async fn announce(&self) -> Result<(), RegistryClientError> {
        self.register().await?;
        self.set_status(InstanceStatus::Up).await
    }

    /// Keep the registration alive until `shutdown` fires, then deregister.
    ///
    /// Every tick renews the lease, or announces the instance when it is not
    /// (or no longer) registered. Failures are logged and retried on the
    /// next tick.
    pub fn spawn(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut registered = false;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(instance = %self.registration.instance_id, "Deregistering from registry");
                        if let Err(e) = self.deregister().await {
                            warn!(error = %e, "Deregistration failed");
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        registered = self.keep_alive(registered).await;
                    }
                }
            }
        })
    }

    /// One lease cycle; returns whether the instance is registered afterwards.
    async fn keep_alive(&self, registered: bool) -> bool {
        if registered {
            match self.renew().await {
                Ok(Renewal::Renewed) => {
                    debug!(instance = %self.registration.instance_id, "Lease renewed");
                    return true;
                },
                Ok(Renewal::NotRegistered) => {
                    warn!(instance = %self.registration.instance_id, "Registry lost the instance, registering again");
                },
                Err(e) => {
                    warn!(error = %e, "Lease renewal failed");
                    return true;
                },
            }
        }

        match self.announce().await {
            Ok(()) => {
                info!(
                    instance = %self.registration.instance_id,
                    app = %self.registration.app,
                    registry = %self.base_url,
                    "Registered with registry"
                );
                true
            },
            Err(e) => {
                warn!(error = %e, registry = %self.base_url, "Registration failed, retrying");
                false
            },
        }
    }
}

fn expect_success(status: StatusCode, url: String) -> Result<(), RegistryClientError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RegistryClientError::Status {
            status: status.as_u16(),
            url,
        })
    }
}

/// Instance id of the form `{app}:{port}:{random}`.
#[must_use]
pub fn instance_id(app: &str, port: u16) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{app}:{port}:{}", &suffix[..8])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_registry_layout() {
        let client = RegistryClient::new(
            "http://registry:8761/",
            Registration::new("rec-1", "recommendation", "localhost", 7002),
        );
        assert_eq!(client.app_url(), "http://registry:8761/eureka/apps/recommendation");
        assert_eq!(
            client.instance_url(),
            "http://registry:8761/eureka/apps/recommendation/rec-1"
        );
    }

    #[test]
    fn instance_ids_are_unique_per_start() {
        let a = instance_id("review", 7003);
        let b = instance_id("review", 7003);
        assert!(a.starts_with("review:7003:"));
        assert_ne!(a, b);
    }

    #[test]
    fn unexpected_status_is_an_error() {
        let error = expect_success(StatusCode::BAD_REQUEST, "u".to_string()).unwrap_err();
        assert_eq!(error.to_string(), "Registry answered 400 for u");
        assert!(expect_success(StatusCode::NO_CONTENT, "u".to_string()).is_ok());
    }
}

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::RwLock;

use crate::{JwkSetEndpoint, request, request::RequestError};

#[derive(Debug, Clone)]
struct JwkSetWithTimestamp {
    jwk_set: JwkSet,
    retrieved: Instant,
}

#[derive(Debug, Default)]
struct KnownJwkSets {
    current: Option<JwkSetWithTimestamp>,

    /// The set replaced by the last rotation. Tokens signed shortly before Keycloak rolled its
    /// keys must still validate until they expire.
    old: Option<JwkSet>,
}

impl KnownJwkSets {
    fn find(&self, kid: Option<&str>) -> Option<Jwk> {
        self.current
            .iter()
            .map(|it| &it.jwk_set)
            .chain(self.old.iter())
            .flat_map(|set| set.keys.iter())
            .find(|jwk| jwk.common.key_id.as_deref() == kid)
            .cloned()
    }

    fn age(&self) -> Option<Duration> {
        self.current.as_ref().map(|it| it.retrieved.elapsed())
    }
}

/// Lazily loaded, periodically refreshed copy of the realm's signing keys.
#[derive(Debug)]
pub(crate) struct JwkSetCache {
    http: reqwest::Client,
    jwks_endpoint: JwkSetEndpoint,
    max_age: Duration,
    min_refetch_interval: Duration,
    known: RwLock<KnownJwkSets>,
}

impl JwkSetCache {
    pub(crate) fn new(
        http: reqwest::Client,
        jwks_endpoint: JwkSetEndpoint,
        max_age: Duration,
        min_refetch_interval: Duration,
    ) -> Self {
        Self {
            http,
            jwks_endpoint,
            max_age,
            min_refetch_interval,
            known: RwLock::new(KnownJwkSets::default()),
        }
    }

    /// Looks up the key named `kid`, fetching the set when none is known yet, when the known
    /// set is too old or when it does not contain the key.
    pub(crate) async fn find(&self, kid: Option<&str>) -> Result<Option<Jwk>, RequestError> {
        {
            let known = self.known.read().await;
            let fresh = known.age().is_some_and(|age| age <= self.max_age);
            if fresh {
                if let Some(jwk) = known.find(kid) {
                    return Ok(Some(jwk));
                }
            }
        }

        let mut known = self.known.write().await;

        // Another task may have fetched while we waited for the lock.
        let age = known.age();
        let too_old = age.is_none_or(|age| age > self.max_age);
        let may_refetch = age.is_none_or(|age| age >= self.min_refetch_interval);
        if !too_old && !may_refetch {
            tracing::trace!(?kid, "JWK set was fetched recently. Not fetching again.");
            return Ok(known.find(kid));
        }
        if !too_old {
            if let Some(jwk) = known.find(kid) {
                return Ok(Some(jwk));
            }
        }

        match request::retrieve_jwk_set(&self.http, self.jwks_endpoint.clone()).await {
            Ok(jwk_set) => {
                let changed = known.current.as_ref().map(|it| &it.jwk_set) != Some(&jwk_set);
                let previous = known.current.replace(JwkSetWithTimestamp {
                    jwk_set,
                    retrieved: Instant::now(),
                });
                if changed {
                    tracing::debug!("JWK set changed");
                    // Because we only rotate if the new JWK set is different, old and current
                    // are always different sets.
                    if let Some(previous) = previous {
                        known.old = Some(previous.jwk_set);
                    }
                }
                Ok(known.find(kid))
            }
            Err(err) if known.current.is_some() => {
                tracing::warn!(?err, "Could not refresh JWK set. Continuing with the known set.");
                Ok(known.find(kid))
            }
            Err(err) => Err(err),
        }
    }
}

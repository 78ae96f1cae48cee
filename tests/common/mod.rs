//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use azuresession::auth::{Account, AuthResponse, IdentityClient, IdentityError, TokenRequest};
use azuresession::store::{KvStore, MemoryStore};
use azuresession::{Config, StaticEnvironment};

/// Scripted identity library.
#[derive(Default)]
pub struct MockIdentity {
    pub account: Mutex<Option<Account>>,
    /// Scripted silent results, each answered after its delay.
    pub silent_results: Mutex<VecDeque<(StdDuration, Result<AuthResponse, IdentityError>)>>,
    pub redirect_result: Mutex<Option<Result<AuthResponse, IdentityError>>>,
    pub silent_calls: AtomicUsize,
    pub login_redirects: AtomicUsize,
    pub token_redirects: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl MockIdentity {
    pub fn signed_in() -> Self {
        let mock = Self::default();
        *mock.account.lock().unwrap() = Some(account());
        mock
    }

    pub fn push_silent(&self, result: Result<AuthResponse, IdentityError>) {
        self.push_silent_after(StdDuration::ZERO, result);
    }

    pub fn push_silent_after(
        &self,
        delay: StdDuration,
        result: Result<AuthResponse, IdentityError>,
    ) {
        self.silent_results.lock().unwrap().push_back((delay, result));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityClient for MockIdentity {
    async fn login_redirect(&self, _request: &TokenRequest) -> Result<(), IdentityError> {
        self.login_redirects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_token_silent(
        &self,
        _request: &TokenRequest,
    ) -> Result<AuthResponse, IdentityError> {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.silent_results.lock().unwrap().pop_front();
        let Some((delay, result)) = next else {
            return Err(IdentityError::new("no_tokens_found", "nothing scripted"));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn acquire_token_redirect(&self, _request: &TokenRequest) -> Result<(), IdentityError> {
        self.token_redirects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), IdentityError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        *self.account.lock().unwrap() = None;
        Ok(())
    }

    fn account(&self) -> Option<Account> {
        self.account.lock().unwrap().clone()
    }

    async fn handle_redirect_callback(&self) -> Option<Result<AuthResponse, IdentityError>> {
        self.redirect_result.lock().unwrap().take()
    }
}

pub fn account() -> Account {
    Account {
        home_account_id: "uid.tid".into(),
        username: "ada@contoso.com".into(),
        name: Some("Ada".into()),
        tenant_id: Some("tid".into()),
        id_token_claims: Default::default(),
    }
}

/// A token response expiring `expires_in` seconds from now.
pub fn token(access_token: &str, expires_in: i64) -> AuthResponse {
    AuthResponse {
        access_token: access_token.into(),
        id_token: None,
        token_type: "Bearer".into(),
        expires_on: Utc::now() + Duration::seconds(expires_in),
        scopes: vec!["user.read".into()],
        account: Some(account()),
    }
}

pub fn config() -> Config {
    Config::from_toml_str("[auth]\nclient_id = \"test-client\"\n").unwrap()
}

pub fn environment(store: &Arc<MemoryStore>) -> Arc<StaticEnvironment> {
    Arc::new(StaticEnvironment::new(
        "https://app.contoso.com/",
        Arc::clone(store) as Arc<dyn KvStore>,
    ))
}

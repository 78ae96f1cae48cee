mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;

use azuresession::auth::IdentityError;
use azuresession::store::{KvStore, MemoryStore, CALLBACK_QUEUE_KEY, CUSTOM_DATA_KEY};
use azuresession::{AppError, Config, ConfigError, Handlers, SessionManager, SessionPhase};

use common::{config, environment, token, MockIdentity};

fn manager(
    config: Config,
    handlers: Handlers,
    identity: &Arc<MockIdentity>,
    store: &Arc<MemoryStore>,
) -> Arc<SessionManager> {
    SessionManager::new(config, handlers, identity.clone(), environment(store)).unwrap()
}

/// Token handler counting (errors, responses).
fn token_counter() -> (Handlers, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let errors = Arc::new(AtomicUsize::new(0));
    let responses = Arc::new(AtomicUsize::new(0));
    let (e, r) = (Arc::clone(&errors), Arc::clone(&responses));
    let handlers = Handlers::new().on_token(move |_ctx, error, response| {
        let (e, r) = (Arc::clone(&e), Arc::clone(&r));
        async move {
            if error.is_some() {
                e.fetch_add(1, Ordering::SeqCst);
            }
            if response.is_some() {
                r.fetch_add(1, Ordering::SeqCst);
            }
            anyhow::Ok(())
        }
    });
    (handlers, errors, responses)
}

fn failing_handlers() -> Handlers {
    Handlers::new().on_token(|_ctx, _error, _response| async {
        Err::<(), _>(anyhow!("handler crashed"))
    })
}

fn persisted_queue(store: &MemoryStore) -> Vec<serde_json::Value> {
    store
        .get(CALLBACK_QUEUE_KEY)
        .map(|raw| serde_json::from_str(&raw).unwrap())
        .unwrap_or_default()
}

#[test]
fn test_missing_client_id_fails_construction() {
    let mut config = config();
    config.auth.client_id = "  ".into();
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::default());

    let result = SessionManager::new(config, Handlers::new(), identity, environment(&store));
    assert!(matches!(
        result,
        Err(AppError::Config(ConfigError::MissingClientId))
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_initialize_acquires_token_when_signed_in() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Ok(token("t1", 3600)));
    let (handlers, errors, responses) = token_counter();

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    let state = session.state();
    assert!(state.is_authenticated);
    assert_eq!(state.access_token, "t1");
    assert_eq!(state.phase, SessionPhase::Authenticated);
    assert_eq!(state.user.unwrap().username, "ada@contoso.com");
    assert_eq!(responses.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(session.has_pending_expiration());
    assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
}

#[tokio::test]
async fn test_unchanged_token_emits_no_event() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Ok(token("t1", 3600)));
    identity.push_silent(Ok(token("t1", 3600)));
    identity.push_silent(Ok(token("t2", 3600)));
    let (handlers, _errors, responses) = token_counter();

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;
    assert_eq!(responses.load(Ordering::SeqCst), 1);

    assert_eq!(session.acquire_token(None).await.as_deref(), Some("t1"));
    assert_eq!(responses.load(Ordering::SeqCst), 1);

    assert_eq!(session.acquire_token(None).await.as_deref(), Some("t2"));
    assert_eq!(responses.load(Ordering::SeqCst), 2);
    assert_eq!(session.access_token(), "t2");
}

#[tokio::test]
async fn test_interaction_required_redirects_without_error_event() {
    for code in ["consent_required", "interaction_required", "login_required"] {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentity::signed_in());
        identity.push_silent(Err(IdentityError::new(code, "user action needed")));
        let (handlers, errors, _responses) = token_counter();

        let session = manager(config(), handlers, &identity, &store);
        session.initialize().await;

        assert_eq!(MockIdentity::count(&identity.token_redirects), 1, "{}", code);
        assert_eq!(errors.load(Ordering::SeqCst), 0, "{}", code);
        assert_eq!(session.state().phase, SessionPhase::InteractionRequired);
        assert!(session.access_token().is_empty());
    }
}

#[tokio::test]
async fn test_other_errors_are_reported_to_handler() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Err(IdentityError::new("network_error", "offline")));
    let (handlers, errors, responses) = token_counter();

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    assert_eq!(MockIdentity::count(&identity.token_redirects), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(responses.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_events_without_handler_are_not_queued() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Err(IdentityError::new("network_error", "offline")));

    let session = manager(config(), Handlers::new(), &identity, &store);
    session.initialize().await;

    assert!(session.pending_callbacks().is_empty());
    assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
}

#[tokio::test]
async fn test_failed_callback_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Err(IdentityError::new("network_error", "offline")));

    let session = manager(config(), failing_handlers(), &identity, &store);
    session.initialize().await;

    assert_eq!(session.pending_callbacks().len(), 1);
    let persisted = persisted_queue(&store);
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0]["event"]["kind"], "token");
    drop(session);

    // Next start, with a working handler and nobody signed in
    let identity = Arc::new(MockIdentity::default());
    let (handlers, errors, _responses) = token_counter();
    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(session.pending_callbacks().is_empty());
    assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
}

#[tokio::test]
async fn test_persisted_callbacks_run_in_order() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Err(IdentityError::new("network_error", "first")));

    let session = manager(config(), failing_handlers(), &identity, &store);
    session.initialize().await;
    identity.push_silent(Err(IdentityError::new("network_error", "second")));
    assert!(session.acquire_token(None).await.is_none());
    assert_eq!(persisted_queue(&store).len(), 2);
    drop(session);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    // Each handler reads what the previous one wrote
    let handlers = Handlers::new().on_token(move |ctx, error, _response| {
        let recorder = Arc::clone(&recorder);
        async move {
            let previous = ctx.custom_data("last");
            tokio::task::yield_now().await;
            let message = error.map(|e| e.message).unwrap_or_default();
            recorder.lock().unwrap().push((message.clone(), previous));
            ctx.save_custom_data("last", json!(message))?;
            anyhow::Ok(())
        }
    });

    let session = manager(config(), handlers, &Arc::new(MockIdentity::default()), &store);
    session.initialize().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("first".to_string(), None),
            ("second".to_string(), Some(json!("first")))
        ]
    );
    assert!(store.get(CALLBACK_QUEUE_KEY).is_none());
}

#[tokio::test]
async fn test_redirect_outcome_is_delivered_before_persisted_entries() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Err(IdentityError::new("network_error", "offline")));
    let session = manager(config(), failing_handlers(), &identity, &store);
    session.initialize().await;
    drop(session);

    let order = Arc::new(Mutex::new(Vec::new()));
    let (auth_order, token_order) = (Arc::clone(&order), Arc::clone(&order));
    let handlers = Handlers::new()
        .on_authentication(move |_ctx, error, response| {
            let order = Arc::clone(&auth_order);
            async move {
                assert!(error.is_none());
                assert_eq!(response.unwrap().access_token, "fresh");
                order.lock().unwrap().push("authentication");
                anyhow::Ok(())
            }
        })
        .on_token(move |_ctx, _error, _response| {
            let order = Arc::clone(&token_order);
            async move {
                order.lock().unwrap().push("token");
                anyhow::Ok(())
            }
        });

    let identity = Arc::new(MockIdentity::default());
    *identity.redirect_result.lock().unwrap() = Some(Ok(token("fresh", 3600)));
    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    assert_eq!(*order.lock().unwrap(), vec!["authentication", "token"]);
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_is_cleared_without_auto_refresh() {
    let mut config = config();
    config.auth.auto_refresh_token = false;
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    // Renewal offset is 300 seconds, so this fires almost immediately
    identity.push_silent(Ok(token("t1", 301)));

    let session = manager(config, Handlers::new(), &identity, &store);
    session.initialize().await;
    assert_eq!(session.access_token(), "t1");

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(session.access_token().is_empty());
    assert_eq!(MockIdentity::count(&identity.silent_calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_is_renewed_with_auto_refresh() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Ok(token("t1", 301)));
    identity.push_silent(Ok(token("t2", 3600)));
    let (handlers, _errors, responses) = token_counter();

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.access_token(), "t2");
    assert_eq!(session.state().phase, SessionPhase::Authenticated);
    assert_eq!(MockIdentity::count(&identity.silent_calls), 2);
    assert_eq!(responses.load(Ordering::SeqCst), 2);
    assert!(session.has_pending_expiration());
}

#[tokio::test]
async fn test_sign_out_runs_hook_and_clears_state() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Ok(token("t1", 3600)));
    let hooks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hooks);
    let handlers = Handlers::new().before_sign_out(move |ctx| {
        let counter = Arc::clone(&counter);
        async move {
            // Still signed in while the hook runs
            assert_eq!(ctx.access_token(), "t1");
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    });

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;
    session.sign_out().await.unwrap();

    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(MockIdentity::count(&identity.logouts), 1);
    let state = session.state();
    assert!(!state.is_authenticated);
    assert!(state.access_token.is_empty());
    assert!(state.user.is_none());
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert!(!session.has_pending_expiration());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_landing_after_sign_out_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    identity.push_silent(Ok(token("t1", 301)));
    // The renewal fires after about a second and answers ten seconds later
    identity.push_silent_after(Duration::from_secs(10), Ok(token("t2", 3600)));
    let (handlers, _errors, responses) = token_counter();

    let session = manager(config(), handlers, &identity, &store);
    session.initialize().await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(MockIdentity::count(&identity.silent_calls), 2);
    assert_eq!(session.state().phase, SessionPhase::TokenRefreshing);

    session.sign_out().await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Unauthenticated);
    assert!(!state.is_authenticated);
    assert!(state.access_token.is_empty());
    assert!(!session.has_pending_expiration());
    assert_eq!(responses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sign_out_proceeds_when_hook_fails() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::signed_in());
    let handlers =
        Handlers::new().before_sign_out(|_ctx| async { Err::<(), _>(anyhow!("nope")) });

    let session = manager(config(), handlers, &identity, &store);
    session.sign_out().await.unwrap();

    assert_eq!(MockIdentity::count(&identity.logouts), 1);
}

#[tokio::test]
async fn test_sign_in_starts_redirect_only_when_needed() {
    let store = Arc::new(MemoryStore::new());

    let identity = Arc::new(MockIdentity::default());
    let session = manager(config(), Handlers::new(), &identity, &store);
    session.sign_in().await.unwrap();
    assert_eq!(MockIdentity::count(&identity.login_redirects), 1);
    assert_eq!(session.state().phase, SessionPhase::RedirectPending);

    let identity = Arc::new(MockIdentity::signed_in());
    let session = manager(config(), Handlers::new(), &identity, &store);
    session.sign_in().await.unwrap();
    assert_eq!(MockIdentity::count(&identity.login_redirects), 0);

    let identity = Arc::new(MockIdentity::default());
    let env = Arc::new(
        azuresession::StaticEnvironment::new("https://app.contoso.com/", store.clone())
            .with_auth_response(true),
    );
    let session = SessionManager::new(config(), Handlers::new(), identity.clone(), env).unwrap();
    session.sign_in().await.unwrap();
    assert!(!session.is_authenticated());
    assert_eq!(MockIdentity::count(&identity.login_redirects), 0);
}

#[tokio::test]
async fn test_require_auth_on_initialize_signs_in() {
    let mut config = config();
    config.auth.require_auth_on_initialize = true;
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::default());

    let session = manager(config, Handlers::new(), &identity, &store);
    session.initialize().await;

    assert_eq!(MockIdentity::count(&identity.login_redirects), 1);
    assert_eq!(MockIdentity::count(&identity.silent_calls), 0);
    assert!(!session.state().is_authenticated);
}

#[tokio::test]
async fn test_custom_data_is_persisted() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::default());

    let session = manager(config(), Handlers::new(), &identity, &store);
    session.save_custom_data("theme", json!("dark")).unwrap();
    session.save_custom_data("tabs", json!([1, 2])).unwrap();
    drop(session);

    let session = manager(config(), Handlers::new(), &identity, &store);
    session.initialize().await;
    assert_eq!(session.custom_data("theme"), Some(json!("dark")));
    assert_eq!(session.state().custom.len(), 2);

    assert_eq!(session.remove_custom_data("theme").unwrap(), Some(json!("dark")));
    assert!(store.get(CUSTOM_DATA_KEY).is_some());
    session.remove_custom_data("tabs").unwrap();
    assert!(store.get(CUSTOM_DATA_KEY).is_none());
}

#[test]
fn test_identity_settings_default_to_current_location() {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MockIdentity::default());
    let session = manager(config(), Handlers::new(), &identity, &store);

    let settings = session.identity_settings();
    assert_eq!(settings.client_id, session.config().auth.client_id);
    assert_eq!(settings.client_id, "test-client");
    assert_eq!(settings.authority, "https://login.microsoftonline.com/common");
    assert_eq!(settings.redirect_uri, "https://app.contoso.com/");
    assert_eq!(settings.post_logout_redirect_uri, "https://app.contoso.com/");
}

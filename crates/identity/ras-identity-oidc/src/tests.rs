//! End-to-end login flows against a mock provider.

#[cfg(test)]
mod flow_tests {
    use crate::{
        AuthOutcome, AuthResponse, AuthSession, Authenticator, OidcConfig, OidcError,
    };
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::collections::HashMap;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLIENT_ID: &str = "test_client_id";
    const CLIENT_SECRET: &str = "test_client_secret";
    const WELL_KNOWN: &str = "/.well-known/openid-configuration";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("ras_identity_oidc=debug")
            .with_test_writer()
            .try_init();
    }

    async fn mock_provider() -> MockServer {
        init_tracing();
        let server = MockServer::start().await;
        mount_discovery(&server, 1u64..).await;
        server
    }

    async fn mount_discovery(server: &MockServer, times: impl Into<wiremock::Times>) {
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "response_types_supported": ["code"],
                "code_challenge_methods_supported": ["S256"],
                "id_token_signing_alg_values_supported": ["HS256"]
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    fn authenticator(server: &MockServer) -> Authenticator {
        let config = OidcConfig::new(
            server.uri(),
            CLIENT_ID,
            CLIENT_SECRET,
            "http://localhost:3000/cb",
        )
        .unwrap()
        .with_scopes(["profile"]);
        Authenticator::new(config).unwrap()
    }

    fn id_token(server: &MockServer, nonce: &str, overrides: serde_json::Value) -> String {
        id_token_signed_with(server, nonce, overrides, CLIENT_SECRET)
    }

    fn id_token_signed_with(
        server: &MockServer,
        nonce: &str,
        overrides: serde_json::Value,
        secret: &str,
    ) -> String {
        let now = Utc::now().timestamp();
        let mut claims = serde_json::json!({
            "iss": server.uri(),
            "sub": "U1234567890",
            "aud": CLIENT_ID,
            "exp": now + 300,
            "iat": now,
            "nonce": nonce,
            "name": "Taro Yamada"
        });
        if let (Some(claims), Some(overrides)) = (claims.as_object_mut(), overrides.as_object()) {
            for (key, value) in overrides {
                claims.insert(key.clone(), value.clone());
            }
        }

        encode(
            &Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn mount_token_endpoint(server: &MockServer, verifier: &str, id_token: String) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth_code_123"))
            .and(body_string_contains(format!("code_verifier={verifier}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "mock_access_token",
                "token_type": "Bearer",
                "expires_in": 2592000,
                "refresh_token": "mock_refresh_token",
                "scope": "openid profile",
                "id_token": id_token
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn redirect_of(outcome: &AuthOutcome) -> &str {
        match &outcome.result {
            Ok(AuthResponse::Redirect(url)) => url,
            other => panic!("Expected redirect, got {other:?}"),
        }
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Start a login for `original_url` and return the session awaiting the callback.
    async fn start_login(auth: &Authenticator, original_url: &str) -> (AuthSession, String) {
        let outcome = auth
            .handle(AuthSession::PreFlow, auth.inbound(original_url))
            .await;
        let url = redirect_of(&outcome).to_string();
        (outcome.session, url)
    }

    fn callback(auth: &Authenticator, state: &str) -> crate::InboundRequest {
        auth.inbound(&format!("/cb?code=auth_code_123&state={state}"))
    }

    fn artifacts(session: &AuthSession) -> crate::FlowArtifacts {
        session
            .pending()
            .and_then(|pending| pending.artifacts.clone())
            .expect("pending login with artifacts")
    }

    #[tokio::test]
    async fn test_fresh_request_redirects_to_provider() {
        let server = mock_provider().await;
        let auth = authenticator(&server);

        let (session, url) = start_login(&auth, "/dashboard?tab=1").await;

        assert!(url.starts_with(&format!("{}/authorize?", server.uri())));
        let params = query_of(&url);
        let artifacts = artifacts(&session);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], "openid profile");
        assert_eq!(params["state"], artifacts.state);
        assert_eq!(params["nonce"], artifacts.nonce);
        assert_eq!(session.pending().unwrap().original_url, "/dashboard?tab=1");
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_valid_callback_authenticates_and_returns_to_original_url() {
        let server = mock_provider().await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let artifacts = artifacts(&session);

        mount_token_endpoint(
            &server,
            &artifacts.code_verifier,
            id_token(&server, &artifacts.nonce, serde_json::json!({})),
        )
        .await;

        let outcome = auth.handle(session, callback(&auth, &artifacts.state)).await;

        assert_eq!(redirect_of(&outcome), "/dashboard");
        let authenticated = outcome.session.authenticated().expect("authenticated");
        assert_eq!(authenticated.subject(), "U1234567890");
        assert_eq!(authenticated.tokens.access_token, "mock_access_token");
        assert_eq!(
            authenticated.tokens.refresh_token.as_deref(),
            Some("mock_refresh_token")
        );
        assert_eq!(authenticated.tokens.claims.name.as_deref(), Some("Taro Yamada"));
    }

    #[tokio::test]
    async fn test_authenticated_session_passes_through_without_provider() {
        let server = MockServer::start().await;
        // Fetched for the authorization request, then served from cache
        mount_discovery(&server, 1u64).await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let artifacts = artifacts(&session);
        mount_token_endpoint(
            &server,
            &artifacts.code_verifier,
            id_token(&server, &artifacts.nonce, serde_json::json!({})),
        )
        .await;
        let session = auth
            .handle(session, callback(&auth, &artifacts.state))
            .await
            .session;

        let outcome = auth.handle(session, auth.inbound("/reports")).await;
        match outcome.result {
            Ok(AuthResponse::PassThrough(authenticated)) => {
                assert_eq!(authenticated.subject(), "U1234567890")
            }
            other => panic!("Expected pass-through, got {other:?}"),
        }
        assert!(outcome.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_tampered_state_is_rejected() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;

        let outcome = auth.handle(session, callback(&auth, "tampered")).await;

        assert_eq!(outcome.result.unwrap_err(), OidcError::StateMismatch);
        assert!(!outcome.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_endpoint_failure_keeps_session_awaiting() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .expect(1)
            .mount(&server)
            .await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let artifacts = artifacts(&session);

        let outcome = auth.handle(session, callback(&auth, &artifacts.state)).await;

        assert!(matches!(
            outcome.result,
            Err(OidcError::TokenExchange(ref msg)) if msg.contains("500")
        ));
        assert_eq!(outcome.session.phase(), "awaiting_callback");
        assert!(!outcome.session.is_authenticated());

        // The artifacts were spent on the failed attempt
        let replay = auth
            .handle(outcome.session, callback(&auth, &artifacts.state))
            .await;
        assert_eq!(replay.result.unwrap_err(), OidcError::StateMismatch);
    }

    #[tokio::test]
    async fn test_second_login_overwrites_first() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let auth = authenticator(&server);

        let (session, _) = start_login(&auth, "/first").await;
        let first = artifacts(&session);

        let outcome = auth.handle(session, auth.inbound("/second")).await;
        let second_url = redirect_of(&outcome).to_string();
        let second = artifacts(&outcome.session);

        assert_ne!(first.state, second.state);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.code_verifier, second.code_verifier);
        assert_eq!(query_of(&second_url)["state"], second.state);
        assert_eq!(outcome.session.pending().unwrap().original_url, "/second");

        let replay = auth
            .handle(outcome.session, callback(&auth, &first.state))
            .await;
        assert_eq!(replay.result.unwrap_err(), OidcError::StateMismatch);
        assert!(!replay.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_nonce_mismatch_is_rejected() {
        let server = mock_provider().await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let artifacts = artifacts(&session);
        mount_token_endpoint(
            &server,
            &artifacts.code_verifier,
            id_token(&server, "someone-elses-nonce", serde_json::json!({})),
        )
        .await;

        let outcome = auth.handle(session, callback(&auth, &artifacts.state)).await;

        assert_eq!(outcome.result.unwrap_err(), OidcError::NonceMismatch);
        assert!(!outcome.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_provider_error_skips_token_exchange() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let state = artifacts(&session).state;

        let request = auth.inbound(&format!(
            "/cb?error=access_denied&error_description=User+cancelled&state={state}"
        ));
        let outcome = auth.handle(session, request).await;

        assert_eq!(
            outcome.result.unwrap_err(),
            OidcError::ProviderError {
                error: "access_denied".to_string(),
                description: "User cancelled".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_callback_without_code_is_rejected() {
        let server = mock_provider().await;
        let auth = authenticator(&server);
        let (session, _) = start_login(&auth, "/dashboard").await;
        let state = artifacts(&session).state;

        let outcome = auth
            .handle(session, auth.inbound(&format!("/cb?state={state}")))
            .await;

        assert_eq!(
            outcome.result.unwrap_err(),
            OidcError::MissingAuthorizationCode
        );
    }

    #[tokio::test]
    async fn test_invalid_id_tokens_are_rejected() {
        let cases = [
            ("bad signature", serde_json::json!({}), "not-the-client-secret"),
            (
                "expired",
                serde_json::json!({ "exp": Utc::now().timestamp() - 600 }),
                CLIENT_SECRET,
            ),
            (
                "wrong audience",
                serde_json::json!({ "aud": "another-client" }),
                CLIENT_SECRET,
            ),
            (
                "wrong issuer",
                serde_json::json!({ "iss": "https://evil.example.com" }),
                CLIENT_SECRET,
            ),
        ];

        for (case, overrides, secret) in cases {
            let server = mock_provider().await;
            let auth = authenticator(&server);
            let (session, _) = start_login(&auth, "/dashboard").await;
            let artifacts = artifacts(&session);
            mount_token_endpoint(
                &server,
                &artifacts.code_verifier,
                id_token_signed_with(&server, &artifacts.nonce, overrides, secret),
            )
            .await;

            let outcome = auth.handle(session, callback(&auth, &artifacts.state)).await;

            assert!(
                matches!(outcome.result, Err(OidcError::TokenValidation(_))),
                "{case}: {:?}",
                outcome.result
            );
            assert!(!outcome.session.is_authenticated(), "{case}");
        }
    }

    #[tokio::test]
    async fn test_discovery_failure_leaves_session_fresh() {
        init_tracing();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let auth = authenticator(&server);

        let outcome = auth
            .handle(AuthSession::PreFlow, auth.inbound("/dashboard"))
            .await;

        let err = outcome.result.unwrap_err();
        assert!(matches!(err, OidcError::Discovery(_)));
        assert!(err.is_retryable());
        assert_eq!(outcome.session, AuthSession::PreFlow);
    }

    #[tokio::test]
    async fn test_expired_pending_login_must_start_over() {
        let server = mock_provider().await;
        let auth = authenticator(&server);
        let (mut session, _) = start_login(&auth, "/dashboard").await;
        let state = artifacts(&session).state;
        if let AuthSession::AwaitingCallback(pending) = &mut session {
            pending.expires_at = Utc::now() - Duration::minutes(1);
        }

        let outcome = auth.handle(session, callback(&auth, &state)).await;

        assert_eq!(outcome.result.unwrap_err(), OidcError::LoginExpired);
        assert_eq!(outcome.session, AuthSession::PreFlow);
    }

    #[tokio::test]
    async fn test_callback_without_login_is_rejected() {
        let server = MockServer::start().await;
        mount_discovery(&server, 0u64).await;
        let auth = authenticator(&server);

        let outcome = auth
            .handle(AuthSession::PreFlow, callback(&auth, "anything"))
            .await;

        assert_eq!(outcome.result.unwrap_err(), OidcError::StateMismatch);
        assert_eq!(outcome.session, AuthSession::PreFlow);
    }

    #[tokio::test]
    async fn test_discovery_outage_on_callback_keeps_login_retryable() {
        init_tracing();
        let server = MockServer::start().await;
        mount_discovery(&server, 1u64).await;
        let config = OidcConfig::new(
            server.uri(),
            CLIENT_ID,
            CLIENT_SECRET,
            "http://localhost:3000/cb",
        )
        .unwrap()
        .with_discovery_ttl(0);
        let auth = Authenticator::new(config).unwrap();

        let (session, _) = start_login(&auth, "/dashboard").await;
        let artifacts = artifacts(&session);

        // Provider goes down between the redirect and the callback
        server.reset().await;
        Mock::given(method("GET"))
            .and(path(WELL_KNOWN))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = auth.handle(session, callback(&auth, &artifacts.state)).await;
        let err = outcome.result.unwrap_err();
        assert!(matches!(err, OidcError::Discovery(_)));
        assert!(err.is_retryable());
        // The artifacts are still there for the retry
        assert_eq!(
            outcome.session.pending().and_then(|p| p.artifacts.as_ref()),
            Some(&artifacts)
        );

        // Provider is back: the same callback now succeeds
        server.reset().await;
        mount_discovery(&server, 1u64).await;
        mount_token_endpoint(
            &server,
            &artifacts.code_verifier,
            id_token(&server, &artifacts.nonce, serde_json::json!({})),
        )
        .await;

        let retry = auth
            .handle(outcome.session, callback(&auth, &artifacts.state))
            .await;
        assert_eq!(redirect_of(&retry), "/dashboard");
        assert!(retry.session.is_authenticated());
    }
}

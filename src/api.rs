//! HTTP client for the prediction service.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::{DeserializeOwned, Error as _};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::{
    BearerToken, Credentials, Envelope, HealthProfile, HistoryRecord, LoginData, MessageResponse,
    PredictionRequest, PredictionResponse, User,
};
use crate::session::{SessionManager, TokenVerifier, Verification};

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Profile and history responses come wrapped in `data`, older builds sent them bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeEnveloped<T> {
    Wrapped(Envelope<T>),
    Bare(T),
}

impl<T> MaybeEnveloped<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped(envelope) => envelope.data,
            Self::Bare(inner) => inner,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    /// Creates a client rooted at `base_url`; every call is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Sends the request and reads the body as JSON whatever the status.
    async fn exchange(&self, request: RequestBuilder) -> Result<(StatusCode, Value), ApiError> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };
        let (status, text) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))??;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|err| {
                debug!(error = %err, "response body is not JSON");
                Value::Null
            })
        };
        Ok((status, body))
    }

    /// Runs one call and maps the response onto the error taxonomy.
    ///
    /// The bearer token comes from `session` when it holds one. A 401 or 422
    /// on a call that carried a token ends the session before returning.
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
        session: Option<&mut SessionManager>,
        fallback: &str,
    ) -> Result<T, ApiError> {
        let token = session
            .as_ref()
            .and_then(|session| session.access_token().cloned());
        let request = match &token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        };

        let (status, body) = self.exchange(request).await?;
        info!(
            endpoint,
            status = status.as_u16(),
            authenticated = token.is_some(),
            "api call"
        );

        if token.is_some()
            && (status == StatusCode::UNAUTHORIZED || status == StatusCode::UNPROCESSABLE_ENTITY)
        {
            if let Some(session) = session {
                if let Err(err) = session.logout().await {
                    warn!(endpoint, error = %err, "could not clear the stored session");
                }
            }
            if status == StatusCode::UNAUTHORIZED {
                warn!(endpoint, "session expired");
                return Err(ApiError::SessionExpired);
            }
            warn!(endpoint, "authorization rejected");
            return Err(ApiError::AuthorizationInvalid);
        }

        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: server_message(&body).unwrap_or_else(|| fallback.to_string()),
            });
        }

        serde_json::from_value(body).map_err(|source| ApiError::Decode { endpoint, source })
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let request = self.http.post(self.url("/register")).json(credentials);
        let response: Option<MessageResponse> = self
            .call("register", request, None, "registration failed")
            .await?;
        Ok(response
            .and_then(|response| response.msg)
            .unwrap_or_else(|| "account created".to_string()))
    }

    /// Exchanges credentials for tokens and starts a session with them.
    pub async fn login(
        &self,
        session: &mut SessionManager,
        credentials: &Credentials,
    ) -> Result<User, ApiError> {
        let request = self.http.post(self.url("/login")).json(credentials);
        let response: Envelope<LoginData> =
            self.call("login", request, None, "login failed").await?;
        let data = response.data;

        let access_token = BearerToken::parse(&data.access_token).ok_or_else(|| {
            ApiError::Decode {
                endpoint: "login",
                source: serde_json::Error::custom("response carried an empty access token"),
            }
        })?;
        let user = data.user().ok_or_else(|| ApiError::Decode {
            endpoint: "login",
            source: serde_json::Error::custom("response carried no user"),
        })?;
        let refresh_token = data.refresh_token.as_deref().and_then(BearerToken::parse);

        session
            .login(access_token, refresh_token, user.clone())
            .await?;
        Ok(user)
    }

    /// Anonymous calls are allowed; a logged-in call gets the richer response.
    pub async fn predict(
        &self,
        session: &mut SessionManager,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse, ApiError> {
        let http_request = self.http.post(self.url("/predict")).json(request);
        self.call("predict", http_request, Some(session), "prediction failed")
            .await
    }

    /// Most recent records first.
    pub async fn history(
        &self,
        session: &mut SessionManager,
        limit: u32,
    ) -> Result<Vec<HistoryRecord>, ApiError> {
        let request = self
            .http
            .get(self.url("/history"))
            .query(&[("limit", limit)]);
        let records: MaybeEnveloped<Vec<HistoryRecord>> = self
            .call("history", request, Some(session), "could not load history")
            .await?;
        Ok(records.into_inner())
    }

    pub async fn delete_history(
        &self,
        session: &mut SessionManager,
        id: i64,
    ) -> Result<(), ApiError> {
        let request = self.http.delete(self.url(&format!("/history/{id}")));
        let _: Option<MessageResponse> = self
            .call(
                "delete_history",
                request,
                Some(session),
                "could not delete the record",
            )
            .await?;
        Ok(())
    }

    pub async fn fetch_profile(
        &self,
        session: &mut SessionManager,
    ) -> Result<HealthProfile, ApiError> {
        let request = self.http.get(self.url("/user"));
        let profile: MaybeEnveloped<HealthProfile> = self
            .call("fetch_profile", request, Some(session), "could not load profile")
            .await?;
        Ok(profile.into_inner())
    }

    pub async fn update_profile(
        &self,
        session: &mut SessionManager,
        profile: &HealthProfile,
    ) -> Result<String, ApiError> {
        let request = self.http.put(self.url("/user")).json(profile);
        let response: Option<MessageResponse> = self
            .call("update_profile", request, Some(session), "could not save profile")
            .await?;
        Ok(response
            .and_then(|response| response.msg)
            .unwrap_or_else(|| "profile saved".to_string()))
    }
}

impl TokenVerifier for ApiClient {
    async fn verify(&self, token: &BearerToken) -> Verification {
        let request = self.http.get(self.url("/user")).bearer_auth(token.as_str());
        match self.exchange(request).await {
            Ok((status, _)) if status.is_success() => Verification::Valid,
            Ok((StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY, _)) => {
                Verification::Rejected
            }
            Ok((status, _)) => {
                warn!(status = status.as_u16(), "token check returned an unexpected status");
                Verification::Unreachable
            }
            Err(err) => {
                warn!(error = %err, "token check failed");
                Verification::Unreachable
            }
        }
    }
}

fn server_message(body: &Value) -> Option<String> {
    ["msg", "error", "message"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::SessionStore;
    use crate::models::{ModelKind, UserId};
    use crate::survey::{QuestionId, Wizard};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap()
    }

    async fn session() -> (SessionManager, SessionStore) {
        let store = SessionStore::in_memory().await.unwrap();
        (SessionManager::new(store.clone()), store)
    }

    async fn logged_in(token: &str) -> (SessionManager, SessionStore) {
        let (mut manager, store) = session().await;
        manager
            .login(
                BearerToken::parse(token).unwrap(),
                BearerToken::parse("refresh-1"),
                User {
                    id: UserId::Number(1),
                    email: "jan@example.com".to_string(),
                },
            )
            .await
            .unwrap();
        (manager, store)
    }

    fn sample_request() -> PredictionRequest {
        PredictionRequest {
            sex: 1,
            age: 5,
            height: 180.0,
            weight: 80.0,
            bmi: 24.7,
            high_bp: false,
            high_chol: false,
            stroke: false,
            diff_walk: false,
            gen_hlth: 3,
            phys_hlth: 0,
            phys_activity: true,
            smoker: false,
            fruits: true,
            veggies: true,
            hvy_alcohol_consump: false,
            ment_hlth: 0,
        }
    }

    #[tokio::test]
    async fn login_persists_session_and_token_is_attached_afterwards() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .and(body_json(json!({"email": "jan@example.com", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "msg": "Login successful",
                "data": {
                    "access_token": "tok-123",
                    "refresh_token": "ref-456",
                    "user_id": 9,
                    "email": "jan@example.com"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .and(header("Authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": 0, "probability": 12.5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        let (mut manager, store) = session().await;
        let credentials = Credentials {
            email: "jan@example.com".to_string(),
            password: "secret".to_string(),
        };

        let user = api.login(&mut manager, &credentials).await.unwrap();
        assert_eq!(user.id, UserId::Number(9));
        assert!(manager.is_logged_in());
        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.access_token.as_str(), "tok-123");
        assert_eq!(persisted.refresh_token.unwrap().as_str(), "ref-456");

        api.predict(&mut manager, &sample_request()).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_is_a_plain_error_not_an_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"msg": "Bad email or password"})),
            )
            .mount(&server)
            .await;

        let (mut manager, _store) = session().await;
        let err = client(&server)
            .login(
                &mut manager,
                &Credentials {
                    email: "jan@example.com".to_string(),
                    password: "nope".to_string(),
                },
            )
            .await
            .unwrap_err();

        match err {
            ApiError::Server { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad email or password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!manager.is_logged_in());
    }

    #[tokio::test]
    async fn expired_session_clears_storage_and_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"msg": "Token has expired"})),
            )
            .mount(&server)
            .await;

        let (mut manager, store) = logged_in("tok-old").await;
        let err = client(&server)
            .history(&mut manager, 10)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::SessionExpired));
        assert!(err.requires_login());
        assert!(!manager.is_logged_in());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unprocessable_token_is_an_authorization_error_and_ends_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"msg": "Not enough segments"})),
            )
            .mount(&server)
            .await;

        let (mut manager, store) = logged_in("garbled").await;
        let err = client(&server)
            .predict(&mut manager, &sample_request())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AuthorizationInvalid));
        assert!(!manager.is_logged_in());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broken_store_does_not_mask_the_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "expired"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"msg": "bad token"})))
            .mount(&server)
            .await;

        let (mut manager, store) = logged_in("tok-123").await;
        store.close().await;
        let err = client(&server).history(&mut manager, 5).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired));
        assert!(!manager.is_logged_in());

        let (mut manager, store) = logged_in("tok-456").await;
        store.close().await;
        let err = client(&server).fetch_profile(&mut manager).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationInvalid));
        assert!(!manager.is_logged_in());
    }

    #[tokio::test]
    async fn other_failures_carry_the_server_message_or_a_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"msg": "User already exists"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let api = client(&server);
        let err = api
            .register(&Credentials {
                email: "jan@example.com".to_string(),
                password: "secret".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User already exists (HTTP 400)");

        let (mut manager, store) = logged_in("tok-123").await;
        let err = api.predict(&mut manager, &sample_request()).await.unwrap_err();
        match err {
            ApiError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "prediction failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(manager.is_logged_in());
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn anonymous_predict_sends_no_authorization_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": 1, "probability": 44.0
            })))
            .mount(&server)
            .await;

        let (mut manager, _store) = session().await;
        let response = client(&server)
            .predict(&mut manager, &sample_request())
            .await
            .unwrap();
        assert!(matches!(response, PredictionResponse::Single(ref single) if single.result == 1));

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(!received[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn anonymous_401_does_not_touch_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "msg": "Missing Authorization Header"
            })))
            .mount(&server)
            .await;

        let (mut manager, _store) = session().await;
        let err = client(&server)
            .predict(&mut manager, &sample_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 401, .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out_with_its_own_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": 0, "probability": 1.0}))
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let api = ApiClient::new(format!("{}/api", server.uri()), Duration::from_millis(200))
            .unwrap();
        let (mut manager, _store) = session().await;
        let err = api
            .predict(&mut manager, &sample_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test]
    async fn survey_submission_posts_coerced_payload_and_returns_response_untouched() {
        let server = MockServer::start().await;
        let backend_body = json!({
            "predictions": {
                "logistic": {"prediction": 0, "confidence": 71.2,
                    "probabilities": {"class_0": 71.2, "class_1": 5.0, "class_2": 23.8}},
                "random_forest": {"prediction": 0, "confidence": 80.4,
                    "probabilities": {"class_0": 80.4, "class_1": 3.1, "class_2": 16.5}},
                "llm_analysis": "Keep up the activity.",
                "shap_factors": ["GenHlth", "BMI"]
            },
            "is_saved": true
        });
        Mock::given(method("POST"))
            .and(path("/api/predict"))
            .and(header("Authorization", "Bearer tok-123"))
            .and(body_json(json!({
                "Sex": 1, "Age": 5, "Height": 180.0, "Weight": 80.0, "BMI": 24.7,
                "HighBP": 0, "HighChol": 0, "Stroke": 0, "DiffWalk": 0,
                "GenHlth": 3, "PhysHlth": 0, "PhysActivity": 1, "Smoker": 0,
                "Fruits": 1, "Veggies": 1, "HvyAlcoholConsump": 0, "MentHlth": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(backend_body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let mut wizard = Wizard::new();
        let answers = [
            (QuestionId::Sex, "1"),
            (QuestionId::Age, "5"),
            (QuestionId::Height, "180"),
            (QuestionId::Weight, "80"),
            (QuestionId::HighBp, "0"),
            (QuestionId::HighChol, "0"),
            (QuestionId::Stroke, "0"),
            (QuestionId::DiffWalk, "0"),
            (QuestionId::GenHlth, "3"),
            (QuestionId::PhysHlth, "0"),
            (QuestionId::PhysActivity, "1"),
            (QuestionId::Smoker, "0"),
            (QuestionId::Fruits, "1"),
            (QuestionId::Veggies, "1"),
            (QuestionId::HvyAlcoholConsump, "0"),
            (QuestionId::MentHlth, "0"),
        ];
        for (index, (question, value)) in answers.iter().enumerate() {
            wizard.set_answer(*question, value).unwrap();
            if index == 3 || index == 9 {
                wizard.next().unwrap();
            }
        }
        let (ticket, request) = wizard.begin_submit().unwrap();
        assert!((request.bmi - 24.7).abs() < 1e-9);

        let (mut manager, _store) = logged_in("tok-123").await;
        let response = client(&server).predict(&mut manager, &request).await.unwrap();
        wizard.finish_submit(ticket, Ok(()));

        let expected: PredictionResponse = serde_json::from_value(backend_body).unwrap();
        assert_eq!(response, expected);
        let PredictionResponse::Ensemble(ensemble) = response else {
            panic!("expected ensemble response");
        };
        assert_eq!(
            ensemble.predictions.get(ModelKind::RandomForest).unwrap().confidence,
            80.4
        );
    }

    #[tokio::test]
    async fn history_is_requested_with_limit_and_deleted_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/history"))
            .and(query_param("limit", "5"))
            .and(header("Authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": 2, "created_at": "2025-02-01T10:00:00", "result": 1,
                     "probability": 31.0, "input_data": {"BMI": 29.7}},
                    {"id": 1, "created_at": "2025-01-01T10:00:00", "result": 0,
                     "probability": 9.0, "input_data": {}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/history/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "Deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        let (mut manager, _store) = logged_in("tok-123").await;
        let records = api.history(&mut manager, 5).await.unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(records[0].input_data.bmi, Some(29.7));

        api.delete_history(&mut manager, 2).await.unwrap();
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"age": 55, "height": 176.0, "weight": 92.0}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/user"))
            .and(body_json(json!({"weight": 90.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "Saved"})))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        let (mut manager, _store) = logged_in("tok-123").await;
        let profile = api.fetch_profile(&mut manager).await.unwrap();
        assert_eq!(profile.age, Some(55));
        assert_eq!(profile.weight, Some(92.0));

        let update = HealthProfile {
            weight: Some(90.0),
            ..HealthProfile::default()
        };
        assert_eq!(api.update_profile(&mut manager, &update).await.unwrap(), "Saved");
    }

    #[tokio::test]
    async fn verifier_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .and(header("Authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/user"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "expired"})))
            .mount(&server)
            .await;

        let api = client(&server);
        assert_eq!(
            api.verify(&BearerToken::parse("good").unwrap()).await,
            Verification::Valid
        );
        assert_eq!(
            api.verify(&BearerToken::parse("stale").unwrap()).await,
            Verification::Rejected
        );

        let offline = ApiClient::new("http://127.0.0.1:9/api", Duration::from_secs(2)).unwrap();
        assert_eq!(
            offline.verify(&BearerToken::parse("good").unwrap()).await,
            Verification::Unreachable
        );
    }

    #[test]
    fn server_message_prefers_msg_then_error() {
        assert_eq!(
            server_message(&json!({"msg": "a", "error": "b"})),
            Some("a".to_string())
        );
        assert_eq!(
            server_message(&json!({"error": "b"})),
            Some("b".to_string())
        );
        assert_eq!(server_message(&json!({"msg": "  "})), None);
        assert_eq!(server_message(&Value::Null), None);
    }
}

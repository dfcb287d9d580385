//! reqwest implementation of the backend collaborators

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use crate::{
    backend::{ChatBackend, SummaryBackend},
    error::{Error, Result},
    summary::{self, SummaryEventStream},
    types::{Message, MessagePage, MessageQuery, NewMessage, SummaryRequest, User},
};

/// Default timeout for plain JSON requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the chat backend
pub struct HttpBackend {
    client: reqwest::Client,
    api_base: String,
    summary_url: Option<String>,
    token: RwLock<Option<String>>,
}

impl HttpBackend {
    /// Create a client for the backend at `api_base` (e.g. `http://localhost:4000`)
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            summary_url: None,
            token: RwLock::new(None),
        })
    }

    /// Use a bearer token for every request
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    /// Set the summary generation endpoint
    pub fn with_summary_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.summary_url = if url.trim().is_empty() {
            None
        } else {
            Some(url)
        };
        self
    }

    /// Current bearer token, if any
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Log in with email and password. The session token arrives in the
    /// `token` cookie (or a `{token}` body as fallback) and is kept for
    /// subsequent requests.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .timeout(REQUEST_TIMEOUT)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(summary::error_from_response(response).await);
        }

        let from_cookie = response
            .cookies()
            .find(|c| c.name() == "token")
            .map(|c| c.value().to_string());

        let token = match from_cookie {
            Some(token) => token,
            None => {
                let body: LoginResponse = response.json().await?;
                body.token.ok_or_else(|| {
                    Error::UnexpectedResponse("login succeeded without a token".to_string())
                })?
            }
        };

        tracing::info!("Login successful");
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self
            .client
            .get(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .query(query);
        let response = self.authorize(request).send().await?;
        decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let request = self
            .client
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(body);
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            return Err(summary::error_from_response(response).await);
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(summary::error_from_response(response).await);
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Build the query string for a message listing
fn message_query_params(query: &MessageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("conversationId", query.conversation_id.clone()),
        ("limit", query.limit.to_string()),
    ];
    if let Some(since) = query.since {
        params.push(("since", since.to_string()));
    }
    params
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn current_user(&self) -> Result<User> {
        let body: CurrentUserResponse = self.get_json("/auth/me", &[]).await?;
        Ok(body.user)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let body: UsersResponse = self.get_json("/users", &[]).await?;
        Ok(body.users)
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage> {
        self.get_json("/messages", &message_query_params(query)).await
    }

    async fn list_typing_users(&self, conversation_id: &str) -> Result<Vec<String>> {
        let body: TypingResponse = self
            .get_json("/typing", &[("conversationId", conversation_id.to_string())])
            .await?;
        Ok(body.typing_users)
    }

    async fn send_message(&self, message: &NewMessage) -> Result<Message> {
        let response = self.post_json("/messages", message).await?;
        let body: SentMessageResponse = response.json().await?;
        Ok(body.message)
    }

    async fn set_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        self.post_json(
            "/typing",
            &TypingRequest {
                conversation_id,
                is_typing,
            },
        )
        .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let result = self.post_json("/auth/logout", &serde_json::json!({})).await;
        *self.token.write() = None;
        result.map(|_| ())
    }
}

#[async_trait]
impl SummaryBackend for HttpBackend {
    async fn stream_summary(&self, request: &SummaryRequest) -> Result<SummaryEventStream> {
        let url = self
            .summary_url
            .as_deref()
            .ok_or_else(|| Error::NotConfigured("summary endpoint".to_string()))?;

        let builder = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        summary::open(self.authorize(builder)).await
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentUserResponse {
    user: User,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingResponse {
    #[serde(default)]
    typing_users: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingRequest<'a> {
    conversation_id: &'a str,
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
struct SentMessageResponse {
    message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_query_params() {
        let params = message_query_params(&MessageQuery::full("global", 100));
        assert_eq!(
            params,
            vec![
                ("conversationId", "global".to_string()),
                ("limit", "100".to_string()),
            ]
        );
    }

    #[test]
    fn test_incremental_query_params() {
        let params = message_query_params(&MessageQuery::since("global", 100, 1_700_000_000_123));
        assert_eq!(params.last(), Some(&("since", "1700000000123".to_string())));
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://localhost:4000/").unwrap();
        assert_eq!(backend.url("/users"), "http://localhost:4000/users");
    }

    #[test]
    fn test_blank_summary_url_is_unset() {
        let backend = HttpBackend::new("http://localhost:4000")
            .unwrap()
            .with_summary_url("  ");
        assert!(backend.summary_url.is_none());
    }

    #[tokio::test]
    async fn test_missing_summary_url_is_not_configured() {
        let backend = HttpBackend::new("http://localhost:4000").unwrap();
        let request = SummaryRequest::new(vec!["a: hi".into()], "en");
        let err = match backend.stream_summary(&request).await {
            Ok(_) => panic!("expected NotConfigured"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[test]
    fn test_token_round_trip() {
        let backend = HttpBackend::new("http://localhost:4000")
            .unwrap()
            .with_token("abc");
        assert_eq!(backend.token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_response_shapes() {
        let typing: TypingResponse =
            serde_json::from_str(r#"{"typingUsers":["u1","u2"]}"#).unwrap();
        assert_eq!(typing.typing_users, vec!["u1", "u2"]);

        let empty: TypingResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.typing_users.is_empty());

        let me: CurrentUserResponse =
            serde_json::from_str(r#"{"user":{"id":"u1","name":"Ada"}}"#).unwrap();
        assert_eq!(me.user.display_name(), "Ada");
    }
}

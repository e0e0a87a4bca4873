use std::{env, fmt, str::FromStr, time::Duration};

#[cfg(all(feature = "reqwest", feature = "ureq"))]
compile_error!("Features 'reqwest' and 'ureq' are mutually exclusive.");

#[cfg(not(any(feature = "reqwest", feature = "ureq")))]
compile_error!("One of the features 'reqwest' and 'ureq' must be enabled.");

#[cfg(feature = "ureq")]
use ureq;

#[cfg(feature = "reqwest")]
use reqwest;

use tracing::{debug, trace};

const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const OPENAI_API_BASE: &str = "OPENAI_API_BASE";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid request: {0}")]
    ValidationError(String),

    #[error("The configuration contains errors: {0}")]
    BadConfigurationError(String),

    #[error("Failed to (de)serialize JSON: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Network error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Non-200 response from API: {0}")]
    RemoteError(u16),

    #[error("API response contained no choices")]
    EmptyResponseError,
}

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// Models accepted by [`Client::send_message`].
///
/// Adding a model means adding a variant here, its wire name in
/// [`Model::as_str`] and an entry in [`Model::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Model {
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Gpt35Turbo, Model::Gpt4];

    /// The identifier sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt35Turbo => "gpt-3.5-turbo",
            Model::Gpt4 => "gpt-4",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Model::ALL.iter().map(Model::as_str).collect();
                Error::ValidationError(format!(
                    "unsupported model identifier '{}', use one of: {}",
                    s,
                    allowed.join(", ")
                ))
            })
    }
}

/// One turn of a conversation. Both fields are sent exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Chat completions request body.
///
/// For reference, see: https://platform.openai.com/docs/api-reference/chat
///
/// ```rust
/// let request = chatgpt_client::ChatCompletions {
///     model: chatgpt_client::Model::Gpt4,
///     messages: vec![chatgpt_client::Message::new(
///         chatgpt_client::ROLE_USER,
///         "Who are you?",
///     )],
/// };
///
/// let body = serde_json::to_value(&request).unwrap();
/// assert_eq!(body["model"], "gpt-4");
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatCompletions {
    pub model: Model,
    pub messages: Vec<Message>,
}

#[derive(Debug, serde::Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: Option<usize>,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Chat completions response.
///
/// Only `choices` and each choice's `message` are required. Compatible
/// gateways may omit or null out the metadata fields.
#[derive(Debug, serde::Deserialize)]
pub struct ChatCompletionsResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    pub choices: Vec<Choice>,
}

impl ChatCompletionsResponse {
    /// Text of the first choice.
    ///
    /// Returns [`Error::EmptyResponseError`] instead of panicking when the
    /// service sent no choices at all.
    pub fn first_content(&self) -> Result<&str, Error> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or(Error::EmptyResponseError)
    }
}

#[cfg(feature = "ureq")]
struct ClientImpl {
    client: ureq::Agent,
    token: String,
    timeout: Option<Duration>,
}

#[cfg(feature = "ureq")]
impl ClientImpl {
    fn new(token: String) -> ClientImpl {
        Self {
            client: ureq::Agent::new(),
            token,
            timeout: None,
        }
    }

    fn do_request(&self, url: &str, body: String) -> Result<String, Error> {
        let mut request = self
            .client
            .post(url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.token));

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        // ureq reports 4xx/5xx as errors; the body is dropped unread.
        let response = match request.send_string(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                debug!(status, "chat completion request rejected");
                return Err(Error::RemoteError(status));
            }
            Err(ureq::Error::Transport(e)) => return Err(Error::TransportError(Box::new(e))),
        };

        if response.status() != 200 {
            debug!(status = response.status(), "chat completion request rejected");
            return Err(Error::RemoteError(response.status()));
        }

        response
            .into_string()
            .map_err(|e| Error::TransportError(Box::new(e)))
    }
}

#[cfg(feature = "reqwest")]
struct ClientImpl {
    client: reqwest::Client,
    token: String,
    timeout: Option<Duration>,
}

#[cfg(feature = "reqwest")]
impl ClientImpl {
    fn new(token: String) -> ClientImpl {
        Self {
            client: reqwest::Client::new(),
            token,
            timeout: None,
        }
    }

    async fn do_request(&self, url: &str, body: String) -> Result<String, Error> {
        // bearer_auth marks the header value as sensitive. A token that is
        // not a valid header value fails here, at send time.
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(&self.token)
            .body(body);

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::TransportError(Box::new(e)))?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status().as_u16();
            debug!(status, "chat completion request rejected");
            return Err(Error::RemoteError(status));
        }

        response
            .text()
            .await
            .map_err(|e| Error::TransportError(Box::new(e)))
    }
}

pub struct Client {
    inner: ClientImpl,
    base_uri: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_uri", &self.base_uri)
            .field("token", &"<redacted>")
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

impl Client {
    /// Creates a new `Client` talking to the OpenAI API.
    ///
    /// The token is stored as given. An empty or malformed token is not
    /// rejected here; the API will refuse it once a request is made.
    ///
    /// # Arguments
    ///
    /// * `token`: The API token, sent as `Authorization: Bearer <token>`.
    pub fn new(token: impl Into<String>) -> Client {
        Self::with_base_uri(DEFAULT_API_BASE, token)
    }

    /// Creates a new `Client` for an OpenAI compatible API.
    ///
    /// # Arguments
    ///
    /// * `base_uri`: The root of the API, e.g. `http://localhost:8080/v1`.
    ///   A trailing `/` is ignored.
    /// * `token`: The API token. Like [`Client::new`], it is not validated.
    ///
    /// # Example
    ///
    /// ```rust
    /// let client = chatgpt_client::Client::with_base_uri("http://localhost:8080/v1/", "token");
    /// assert_eq!(client.base_uri(), "http://localhost:8080/v1");
    /// ```
    pub fn with_base_uri(base_uri: impl Into<String>, token: impl Into<String>) -> Client {
        let base_uri = base_uri.into().trim_end_matches('/').to_string();

        Self {
            inner: ClientImpl::new(token.into()),
            base_uri,
        }
    }

    /// Creates a new `Client` from environment variables.
    ///
    /// This function reads `OPENAI_API_KEY` and, if set, `OPENAI_API_BASE`.
    /// Without `OPENAI_API_BASE` the client talks to the OpenAI API.
    ///
    /// # Returns
    ///
    /// A `Result` containing the new `Client` instance, or
    /// [`Error::BadConfigurationError`] if `OPENAI_API_KEY` is unset or empty.
    pub fn from_environment() -> Result<Client, Error> {
        let token = env::var(OPENAI_API_KEY).unwrap_or_default();
        if token.is_empty() {
            return Err(Error::BadConfigurationError(format!(
                "{} is not set",
                OPENAI_API_KEY
            )));
        }

        let base_uri = env::var(OPENAI_API_BASE).unwrap_or_default();
        if base_uri.is_empty() {
            Ok(Self::new(token))
        } else {
            Ok(Self::with_base_uri(base_uri, token))
        }
    }

    /// Aborts any request that takes longer than `timeout` with
    /// [`Error::TransportError`]. Without it the transport's default applies.
    pub fn timeout(mut self, timeout: Duration) -> Client {
        self.inner.timeout = Some(timeout);
        self
    }

    /// The API root requests are sent to, without a trailing `/`.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_uri, CHAT_COMPLETIONS_PATH)
    }

    fn encode(&self, request: &ChatCompletions) -> Result<(String, String), Error> {
        let url = self.endpoint();
        let body = serde_json::to_string(request).map_err(Error::SerializationError)?;
        debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );
        Ok((url, body))
    }

    fn decode(body: &str) -> Result<ChatCompletionsResponse, Error> {
        trace!(bytes = body.len(), "decoding chat completion response");
        let response: ChatCompletionsResponse =
            serde_json::from_str(body).map_err(Error::SerializationError)?;
        debug!(
            id = response.id.as_deref().unwrap_or("-"),
            choices = response.choices.len(),
            "received chat completion response"
        );
        Ok(response)
    }

    fn build_request(model: &str, messages: &[Message]) -> Result<ChatCompletions, Error> {
        let model = model.parse::<Model>()?;
        Ok(ChatCompletions {
            model,
            messages: messages.to_vec(),
        })
    }

    /// Sends a chat completion request and returns the full response.
    ///
    /// Unlike [`Client::send_message`] this keeps every choice together with
    /// the response metadata. The model is already a [`Model`], so no
    /// validation happens here.
    ///
    /// # Arguments
    ///
    /// * `request`: The `ChatCompletions` struct containing the model and the conversation.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ChatCompletionsResponse` struct. A non-200
    /// status is [`Error::RemoteError`], a body that does not decode is
    /// [`Error::SerializationError`] and a failed exchange is
    /// [`Error::TransportError`].
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use chatgpt_client::{ChatCompletions, Client, Message, Model, ROLE_USER};
    ///
    /// let client = Client::from_environment()?;
    /// let request = ChatCompletions {
    ///     model: Model::Gpt35Turbo,
    ///     messages: vec![Message::new(ROLE_USER, "Hello!")],
    /// };
    ///
    /// let response = client.chat_completions(&request).await?;
    /// for choice in &response.choices {
    ///     println!("{:?}: {}", choice.finish_reason, choice.message.content);
    /// }
    /// ```
    #[cfg(feature = "reqwest")]
    pub async fn chat_completions(
        &self,
        request: &ChatCompletions,
    ) -> Result<ChatCompletionsResponse, Error> {
        let (url, body) = self.encode(request)?;
        let response = self.inner.do_request(&url, body).await?;

        Self::decode(&response)
    }

    /// Sends a chat completion request and returns the full response.
    ///
    /// Unlike [`Client::send_message`] this keeps every choice together with
    /// the response metadata. The model is already a [`Model`], so no
    /// validation happens here.
    ///
    /// # Arguments
    ///
    /// * `request`: The `ChatCompletions` struct containing the model and the conversation.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `ChatCompletionsResponse` struct. A non-200
    /// status is [`Error::RemoteError`], a body that does not decode is
    /// [`Error::SerializationError`] and a failed exchange is
    /// [`Error::TransportError`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use chatgpt_client::{ChatCompletions, Client, Message, Model, ROLE_USER};
    ///
    /// let client = Client::from_environment().unwrap();
    /// let request = ChatCompletions {
    ///     model: Model::Gpt35Turbo,
    ///     messages: vec![Message::new(ROLE_USER, "Hello!")],
    /// };
    ///
    /// let response = client.chat_completions(&request).unwrap();
    /// for choice in &response.choices {
    ///     println!("{:?}: {}", choice.finish_reason, choice.message.content);
    /// }
    /// ```
    #[cfg(feature = "ureq")]
    pub fn chat_completions(
        &self,
        request: &ChatCompletions,
    ) -> Result<ChatCompletionsResponse, Error> {
        let (url, body) = self.encode(request)?;
        let response = self.inner.do_request(&url, body)?;

        Self::decode(&response)
    }

    /// Sends `messages` to `model` and returns the text of the first choice.
    ///
    /// # Arguments
    ///
    /// * `model`: One of [`Model::ALL`], e.g. `"gpt-3.5-turbo"`. Anything else
    ///   fails with [`Error::ValidationError`] before a request is made.
    /// * `messages`: The conversation, sent in the given order and unchanged.
    ///
    /// # Returns
    ///
    /// The content of `choices[0]`, or [`Error::EmptyResponseError`] if the
    /// API returned no choices. Other failures are as for
    /// [`Client::chat_completions`].
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use chatgpt_client::{Client, Message, ROLE_USER};
    ///
    /// let client = Client::new("sk-...");
    /// let reply = client
    ///     .send_message("gpt-4", &[Message::new(ROLE_USER, "Hello!")])
    ///     .await?;
    /// println!("{}", reply);
    /// ```
    #[cfg(feature = "reqwest")]
    pub async fn send_message(&self, model: &str, messages: &[Message]) -> Result<String, Error> {
        let request = Self::build_request(model, messages)?;
        let response = self.chat_completions(&request).await?;

        response.first_content().map(str::to_string)
    }

    /// Sends `messages` to `model` and returns the text of the first choice.
    ///
    /// # Arguments
    ///
    /// * `model`: One of [`Model::ALL`], e.g. `"gpt-3.5-turbo"`. Anything else
    ///   fails with [`Error::ValidationError`] before a request is made.
    /// * `messages`: The conversation, sent in the given order and unchanged.
    ///
    /// # Returns
    ///
    /// The content of `choices[0]`, or [`Error::EmptyResponseError`] if the
    /// API returned no choices. Other failures are as for
    /// [`Client::chat_completions`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use chatgpt_client::{Client, Message, ROLE_SYSTEM, ROLE_USER};
    ///
    /// let client = Client::new("sk-...");
    /// let reply = client
    ///     .send_message(
    ///         "gpt-3.5-turbo",
    ///         &[
    ///             Message::new(ROLE_SYSTEM, "You are a helpful assistant."),
    ///             Message::new(ROLE_USER, "What is the capital of France?"),
    ///         ],
    ///     )
    ///     .unwrap();
    /// println!("{}", reply);
    /// ```
    #[cfg(feature = "ureq")]
    pub fn send_message(&self, model: &str, messages: &[Message]) -> Result<String, Error> {
        let request = Self::build_request(model, messages)?;
        let response = self.chat_completions(&request)?;

        response.first_content().map(str::to_string)
    }
}

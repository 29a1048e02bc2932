pub use client::{Auth, Client, ClientError, Headers, StatusCode};
pub use uri::{InvalidUriError, Uri};

mod uri {
    use std::fmt::Display;
    use std::str::FromStr;

    use reqwest::Url;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub struct InvalidUriError(String);

    impl Display for InvalidUriError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    /// Absolute http(s) endpoint
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Uri(Url);

    impl Uri {
        pub fn host(&self) -> Option<&str> {
            self.0.host_str()
        }

        /// Port of the endpoint, falling back to the scheme default
        pub fn port(&self) -> Option<u16> {
            self.0.port_or_known_default()
        }

        /// `host:port` pair suitable for opening a socket
        pub fn authority(&self) -> Option<String> {
            match (self.host(), self.port()) {
                (Some(host), Some(port)) => Some(format!("{host}:{port}")),
                _ => None,
            }
        }

        pub fn from_parts(
            base_uri: Uri,
            path: &str,
            query: Option<&str>,
        ) -> Result<Self, InvalidUriError> {
            let mut url = base_uri.0;
            url.set_path(path);
            url.set_query(query);
            Ok(Self(url))
        }

        pub(super) fn as_url(&self) -> &Url {
            &self.0
        }
    }

    impl Display for Uri {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for Uri {
        type Err = InvalidUriError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let url = Url::parse(s).map_err(|e| InvalidUriError(format!("{s}: {e}")))?;
            match url.scheme() {
                "http" | "https" if url.host_str().is_some() => Ok(Self(url)),
                _ => Err(InvalidUriError(format!(
                    "{s} is not an absolute http(s) address"
                ))),
            }
        }
    }
}

mod client {
    use std::collections::HashMap;
    use std::time::Duration;

    use reqwest::RequestBuilder;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use serde::Serialize;

    use super::uri::Uri;

    pub type Method = reqwest::Method;
    pub type StatusCode = reqwest::StatusCode;
    pub type Headers = HashMap<String, String>;

    #[derive(Debug, thiserror::Error)]
    pub enum ClientError {
        #[error("failed to build request: {0}")]
        Request(String),

        #[error("server replied with status: {0}")]
        Response(StatusCode),

        #[error(transparent)]
        Client(reqwest::Error),
    }

    #[derive(Debug)]
    pub struct Response(reqwest::Response);

    impl Response {
        pub fn status(&self) -> StatusCode {
            self.0.status()
        }
    }

    #[derive(Debug, Clone)]
    pub enum Auth {
        Bearer {
            token: String,
        },
        /// Pre-formatted `Authorization` header value, e.g. a shared access
        /// signature
        Header {
            value: String,
        },
    }

    // Based on: https://github.com/ramsayleung/rspotify/blob/master/rspotify-http/src/reqwest.rs
    #[derive(Debug, Clone)]
    pub struct Client {
        client: reqwest::Client,
        timeout: Option<Duration>,
        auth: Option<Auth>,
    }

    impl Default for Client {
        /// Default client with a timeout of 10 seconds.
        fn default() -> Self {
            Self::new(Some(Duration::from_secs(10)))
        }
    }

    impl Client {
        pub fn new(timeout: Option<Duration>) -> Self {
            Self {
                client: reqwest::Client::new(),
                timeout,
                auth: None,
            }
        }

        pub fn auth(self, auth: Option<Auth>) -> Self {
            Self {
                client: self.client,
                timeout: self.timeout,
                auth,
            }
        }

        /// POST `payload` as JSON, discarding any response body
        pub async fn post<Payload>(
            &self,
            uri: &Uri,
            headers: Option<&Headers>,
            payload: &Payload,
        ) -> Result<Response, ClientError>
        where
            Payload: Serialize + ?Sized,
        {
            wrap_status_error(
                self.request(Method::POST, uri, |req| {
                    let headers = headers
                        .map(into_header_map)
                        .unwrap_or(Ok(HeaderMap::new()))?;
                    Ok(req.headers(headers).json(payload))
                })
                .await?,
            )
        }

        /// Thin wrapper around [reqwest::Request], this is your gateway to
        /// a fully customizable client if this type's methods won't do.
        pub async fn request<D>(
            &self,
            method: Method,
            uri: &Uri,
            decorator: D,
        ) -> Result<Response, ClientError>
        where
            D: FnOnce(RequestBuilder) -> Result<RequestBuilder, ClientError>,
        {
            let mut request = self.client.request(method, uri.as_url().clone());

            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            if let Some(auth) = &self.auth {
                request = match auth {
                    Auth::Bearer { token } => request.bearer_auth(token),
                    Auth::Header { value } => request.header("Authorization", value),
                };
            };

            request = decorator(request)?;

            Ok(Response(request.send().await.map_err(ClientError::Client)?))
        }
    }

    /// Convert headers into a [HeaderMap].
    ///
    /// This will return a [ClientError] for any non-ASCII keys or values.
    fn into_header_map(headers: &Headers) -> Result<HeaderMap, ClientError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (key, value) in headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|err| ClientError::Request(err.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|err| ClientError::Request(err.to_string()))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    fn wrap_status_error(res: Response) -> Result<Response, ClientError> {
        match res.status() {
            status if status.is_success() => Ok(res),
            status => Err(ClientError::Response(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_uri_authority_uses_scheme_default_port() {
        let uri: Uri = "https://hub.example.net/devices".parse().unwrap();
        assert_eq!(uri.authority().as_deref(), Some("hub.example.net:443"));

        let uri: Uri = "http://127.0.0.1:8080".parse().unwrap();
        assert_eq!(uri.authority().as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn test_uri_rejects_non_http() {
        assert!("mqtt://hub.example.net".parse::<Uri>().is_err());
        assert!("/relative/path".parse::<Uri>().is_err());
    }

    #[test]
    fn test_uri_from_parts_replaces_path_and_query() {
        let base: Uri = "https://hub.example.net/ignored?x=1".parse().unwrap();
        let uri = Uri::from_parts(base, "/devices/dev1/messages/events", Some("api-version=1"))
            .unwrap();
        assert_eq!(
            uri.to_string(),
            "https://hub.example.net/devices/dev1/messages/events?api-version=1"
        );
    }

    #[tokio::test]
    async fn test_post_sends_json_and_auth() {
        let mut server = Server::new_async().await;
        let uri: Uri = server.url().parse().unwrap();

        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer test-token")
            .match_header("x-extra", "yes")
            .match_body(Matcher::Json(json!({"hello": "world"})))
            .with_status(204)
            .create_async()
            .await;

        let client = Client::default().auth(Some(Auth::Bearer {
            token: "test-token".to_string(),
        }));
        let headers = Headers::from([("x-extra".to_string(), "yes".to_string())]);
        let res = client
            .post(&uri, Some(&headers), &json!({"hello": "world"}))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_wraps_error_status() {
        let mut server = Server::new_async().await;
        let uri: Uri = server.url().parse().unwrap();

        let mock = server
            .mock("POST", "/")
            .with_status(401)
            .create_async()
            .await;

        let client = Client::default();
        let err = client.post(&uri, None, &json!({})).await.unwrap_err();

        assert!(matches!(err, ClientError::Response(StatusCode::UNAUTHORIZED)));
        mock.assert_async().await;
    }
}

//! The signed request envelope: nonce sequencing, JWS wrapping, and
//! response routing shared by every protocol operation.

use serde_json::Value;
use tracing::{debug, error};

use crate::client::AcmeClient;
use crate::error::{AcmeError, AcmeResult};
use crate::problem;
use crate::transport::HttpResponse;

/// Content type of signed request bodies.
pub(crate) const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// A 2xx server response as handed to an [`Exchange`].
pub(crate) struct ServerReply {
    pub(crate) res: HttpResponse,
    /// Parsed body, present when the exchange expects JSON.
    pub(crate) json: Option<Value>,
}

/// One protocol exchange: builds the payload that goes inside the signed
/// envelope and turns the server's reply into its result. Whether the
/// reply body is parsed as JSON is a property of the exchange.
pub(crate) trait Exchange {
    type Output;

    /// The JSON payload to sign and send.
    fn build_payload(&self) -> AcmeResult<Value>;

    /// Whether the reply body must parse as JSON before [`consume`] runs.
    ///
    /// [`consume`]: Exchange::consume
    fn expects_json(&self) -> bool {
        true
    }

    /// Turn a 2xx reply into the exchange's result.
    fn consume(&mut self, reply: ServerReply) -> AcmeResult<Self::Output>;
}

impl AcmeClient {
    /// Signed POST. The directory and a nonce are ensured first, the
    /// nonce is consumed into the protected header, and the reply's
    /// Replay-Nonce refills the slot whatever the outcome.
    pub(crate) async fn post<E: Exchange>(
        &mut self,
        url: &str,
        exchange: &mut E,
    ) -> AcmeResult<E::Output> {
        self.ensure_directory().await?;
        let nonce = self.take_nonce().await?;
        let payload = exchange.build_payload()?;
        let body = self.account_key().signed_json(&payload, &nonce, url)?;

        debug!("[{}] POST {}", self.sname(), url);
        let res = self.transport().post(url, JOSE_CONTENT_TYPE, body).await?;
        self.absorb_nonce(&res);
        self.deliver(url, res, exchange)
    }

    /// Unsigned GET through the same response routing.
    pub(crate) async fn get<E: Exchange>(
        &mut self,
        url: &str,
        exchange: &mut E,
    ) -> AcmeResult<E::Output> {
        debug!("[{}] GET {}", self.sname(), url);
        let res = self.transport().get(url).await?;
        self.absorb_nonce(&res);
        self.deliver(url, res, exchange)
    }

    /// GET a JSON document.
    pub(crate) async fn get_json(&mut self, url: &str) -> AcmeResult<Value> {
        self.get(url, &mut FetchJson).await
    }

    fn deliver<E: Exchange>(
        &self,
        url: &str,
        res: HttpResponse,
        exchange: &mut E,
    ) -> AcmeResult<E::Output> {
        if !res.is_success() {
            return Err(problem::inspect(url, &res));
        }

        let json = if exchange.expects_json() {
            match serde_json::from_slice(&res.body) {
                Ok(json) => Some(json),
                Err(err) => {
                    error!(
                        "[{}] {}: 2xx response body is not JSON: {}",
                        self.sname(),
                        url,
                        err
                    );
                    return Err(AcmeError::Invalid(format!(
                        "{}: response body is not JSON",
                        url
                    )));
                }
            }
        } else {
            None
        };

        exchange.consume(ServerReply { res, json })
    }
}

/// Exchange returning the reply's JSON document.
struct FetchJson;

impl Exchange for FetchJson {
    type Output = Value;

    fn build_payload(&self) -> AcmeResult<Value> {
        Ok(Value::Null)
    }

    fn consume(&mut self, reply: ServerReply) -> AcmeResult<Value> {
        reply
            .json
            .ok_or_else(|| AcmeError::Invalid("expected a JSON response body".to_string()))
    }
}

//! Connection settings for the rumqttc transport.

use std::time::Duration;

use crate::{Result, RpcError};

const DEFAULT_PORT: u16 = 1883;

/// Delivery guarantee requested from the broker.
///
/// `AtLeastOnce` and `ExactlyOnce` may redeliver a request after a broker
/// failover; the client discards replies for calls it no longer waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryQuality {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl DeliveryQuality {
    pub(super) fn qos(self) -> rumqttc::QoS {
        match self {
            DeliveryQuality::AtMostOnce => rumqttc::QoS::AtMostOnce,
            DeliveryQuality::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            DeliveryQuality::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker connection settings.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "transport_rumqttc")]
/// # {
/// use std::time::Duration;
/// use ef_rpc::{DeliveryQuality, MqttOptions};
///
/// let options = MqttOptions::new("mqtt://localhost:1883", "calc-client")
///     .with_credentials("user", "secret")
///     .with_quality(DeliveryQuality::AtMostOnce)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(options.client_id, "calc-client");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttOptions {
    // ---
    /// `mqtt://host:port`, `tcp://host:port`, or a bare `host[:port]`.
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub max_inflight: u16,
    pub quality: DeliveryQuality,

    /// How long `start()` waits for the broker to acknowledge the connection.
    pub connect_timeout: Duration,
}

impl MqttOptions {
    pub fn new(broker_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            max_inflight: 100,
            quality: DeliveryQuality::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_max_inflight(mut self, max_inflight: u16) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn with_quality(mut self, quality: DeliveryQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Split the broker URL into host and port.
    pub(super) fn host_port(&self) -> Result<(String, u16)> {
        parse_broker_url(&self.broker_url)
    }

    /// Build the rumqttc client options.
    pub(super) fn client_options(&self) -> Result<rumqttc::MqttOptions> {
        // ---
        if self.client_id.is_empty() {
            return Err(RpcError::InvalidConfig("mqtt client id is empty".into()));
        }

        let (host, port) = self.host_port()?;
        let mut options = rumqttc::MqttOptions::new(self.client_id.as_str(), host, port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(self.clean_session)
            .set_inflight(self.max_inflight);

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user.as_str(), pass.as_str());
        }
        Ok(options)
    }
}

fn parse_broker_url(broker_url: &str) -> Result<(String, u16)> {
    // ---
    let rest = broker_url
        .strip_prefix("mqtt://")
        .or_else(|| broker_url.strip_prefix("tcp://"))
        .unwrap_or(broker_url);

    if rest.is_empty() || rest.contains("://") {
        return Err(RpcError::InvalidConfig(format!(
            "invalid broker url: {broker_url:?}"
        )));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_err| {
                RpcError::InvalidConfig(format!("invalid port in broker url {broker_url:?}"))
            })?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(RpcError::InvalidConfig(format!(
            "missing host in broker url {broker_url:?}"
        ))),
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}

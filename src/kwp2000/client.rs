use crate::can::hex;
use crate::kwp2000::error::{KwpError, NegativeResponseCode};
use crate::kwp2000::types::ServiceId;
use crate::tp20::Transport;

/// Negative response tag
pub const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Log entry direction
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum LogDirection {
    Tx,
    Rx,
    Error,
}

impl std::fmt::Display for LogDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogDirection::Tx => write!(f, "TX"),
            LogDirection::Rx => write!(f, "RX"),
            LogDirection::Error => write!(f, "ERR"),
        }
    }
}

/// Log entry for KWP2000 communication
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub direction: LogDirection,
    pub data_hex: String,
    pub timestamp: String,
    pub description: String,
}

/// Callback type for logging KWP2000 messages
pub type LogCallback = Box<dyn Fn(LogEntry) + Send + Sync>;

/// KWP2000 client over any [`Transport`]. One request at a time, each followed by exactly
/// one response.
pub struct KwpClient<T: Transport> {
    transport: T,
    log_callback: Option<LogCallback>,
}

impl<T: Transport> KwpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log_callback: None,
        }
    }

    pub fn set_log_callback(&mut self, callback: LogCallback) {
        self.log_callback = Some(callback);
    }

    fn log(&self, direction: LogDirection, data: &[u8], description: &str) {
        if let Some(ref cb) = self.log_callback {
            cb(LogEntry {
                direction,
                data_hex: hex(data),
                timestamp: chrono::Local::now().format("%H:%M:%S%.3f").to_string(),
                description: description.to_string(),
            });
        }
    }

    /// Send `service [subfunction] [data]` and classify the single response.
    ///
    /// Returns the payload after the positive response id and, if one was sent, the echoed
    /// subfunction.
    pub fn request(
        &mut self,
        service: ServiceId,
        subfunction: Option<u8>,
        data: &[u8],
    ) -> Result<Vec<u8>, KwpError> {
        let mut request = Vec::with_capacity(data.len() + 2);
        request.push(service.to_byte());
        request.extend(subfunction);
        request.extend_from_slice(data);

        log::debug!("KWP TX: {}", hex(&request));
        self.log(LogDirection::Tx, &request, service.name());

        let response = match self.exchange(&request) {
            Ok(r) => r,
            Err(e) => {
                self.log(LogDirection::Error, &[], &e.to_string());
                return Err(e);
            }
        };
        log::debug!("KWP RX: {}", hex(&response));

        match classify(service, subfunction, &response) {
            Ok(payload) => {
                self.log(LogDirection::Rx, &response, service.name());
                Ok(payload)
            }
            Err(e) => {
                self.log(LogDirection::Error, &response, &e.to_string());
                Err(e)
            }
        }
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, KwpError> {
        self.transport.send(request)?;
        Ok(self.transport.recv()?)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

fn classify(
    service: ServiceId,
    subfunction: Option<u8>,
    response: &[u8],
) -> Result<Vec<u8>, KwpError> {
    let response_sid = response.first().copied();

    if response_sid == Some(NEGATIVE_RESPONSE) {
        return Err(KwpError::NegativeResponse {
            service_id: response.get(1).copied(),
            code: response.get(2).map(|c| NegativeResponseCode::from_byte(*c)),
            trailing: response.get(3..).unwrap_or_default().to_vec(),
        });
    }

    let expected = service.positive_response();
    if response_sid != Some(expected) {
        return Err(KwpError::UnexpectedServiceId {
            expected,
            received: response_sid,
        });
    }

    let Some(subfunction) = subfunction else {
        return Ok(response[1..].to_vec());
    };
    let echoed = response.get(1).copied();
    if echoed != Some(subfunction) {
        return Err(KwpError::UnexpectedSubfunction {
            expected: subfunction,
            received: echoed,
        });
    }
    Ok(response[2..].to_vec())
}

//! Login handshake.
//!
//! The client proves knowledge of the password without sending it:
//!
//! ```text
//! request:  [bot(4)] [fix_ver2(3)] [timestamp(4)] [nonce(16)] [proof(32)]
//! response: [status(1)] [sealed session key(N), success only]
//! ```
//!
//! `proof` and the key that seals the session key in the response are both
//! derived from `sha256(password)` and the client nonce, with distinct labels.
//! Handshake state is per attempt ([`LoginState`]) and zeroed on drop.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use zeroize::{Zeroize, Zeroizing};

use crate::core::io::{PacketReader, PacketWriter};
use crate::core::packet::{
    build_outgoing_packet, KnownPacketId, OutgoingPacket, PacketVersion, SequenceId, FIX_VER2,
};
use crate::error::{constants, DecodeError, ProtocolError, Result};
use crate::utils::crypto::{SessionCipher, SessionKey, KEY_SIZE};

const PROOF_LABEL: &[u8] = b"tim-login-proof";
const KEY_LABEL: &[u8] = b"tim-login-key";

/// Length of the client nonce
pub const LOGIN_NONCE_SIZE: usize = 16;

/// Client-side state of one login attempt
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct LoginState {
    password_digest: [u8; 32],
    nonce: Option<[u8; LOGIN_NONCE_SIZE]>,
}

impl LoginState {
    fn new(password: &str) -> Result<Self> {
        let mut nonce = [0u8; LOGIN_NONCE_SIZE];
        getrandom::fill(&mut nonce)
            .map_err(|_| ProtocolError::Custom(constants::ERR_RANDOM_SOURCE.into()))?;

        Ok(Self {
            password_digest: password_digest(password),
            nonce: Some(nonce),
        })
    }

    fn nonce(&self) -> Result<&[u8; LOGIN_NONCE_SIZE]> {
        self.nonce.as_ref().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_LOGIN_NONCE_NOT_FOUND.into())
        })
    }

    /// Key sealing the session key in a successful response
    pub fn login_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        Ok(Zeroizing::new(derive(
            KEY_LABEL,
            &self.password_digest,
            self.nonce()?,
        )))
    }
}

impl fmt::Debug for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginState").finish_non_exhaustive()
    }
}

/// Get the current timestamp in seconds
///
/// # Errors
/// Returns a `ProtocolError::Custom` if the system time is earlier than UNIX_EPOCH
fn current_timestamp() -> Result<u32> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as u32)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

fn password_digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

fn derive(label: &[u8], password_digest: &[u8; 32], nonce: &[u8; LOGIN_NONCE_SIZE]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(password_digest);
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Plaintext login packet
pub struct LoginPacket;

impl LoginPacket {
    pub const ID: KnownPacketId = KnownPacketId::Login;
    pub const VERSION: PacketVersion = PacketVersion {
        date: "2019.11.02",
        tim_version: "2.3.2.21173",
    };

    /// Build the login request and the state needed to read its response.
    #[instrument(skip(password))]
    pub fn encode(
        bot: u32,
        password: &str,
        sequence_id: SequenceId,
    ) -> Result<(LoginState, OutgoingPacket)> {
        let state = LoginState::new(password)?;
        let timestamp = current_timestamp()?;
        let nonce = *state.nonce()?;
        let proof = derive(PROOF_LABEL, &state.password_digest, &nonce);

        let packet = build_outgoing_packet(Self::ID, sequence_id, |w| {
            w.write_qq(bot);
            w.write_bytes(&FIX_VER2);
            w.write_u32(timestamp);
            w.write_bytes(&nonce);
            w.write_bytes(&proof);
            Ok(())
        })?;

        debug!("Client initiating login");
        Ok((state, packet))
    }

    /// Parse the server's answer to [`encode`](Self::encode).
    pub fn decode(
        reader: &mut PacketReader<'_>,
        state: &LoginState,
        cipher: &Arc<dyn SessionCipher>,
    ) -> std::result::Result<LoginResponse, DecodeError> {
        let status = reader.read_u8()?;
        let response = match status {
            0x00 => {
                let login_key = state
                    .login_key()
                    .map_err(|_| DecodeError::DecryptionFailure)?;
                let opened = Zeroizing::new(cipher.open(&login_key, reader.read_remaining())?);
                let bytes: [u8; KEY_SIZE] = opened
                    .as_slice()
                    .try_into()
                    .map_err(|_| DecodeError::DecryptionFailure)?;
                LoginResponse::Success(SessionKey::new(bytes, cipher.clone()))
            }
            0x01 => LoginResponse::WrongPassword,
            0x02 => LoginResponse::CaptchaRequired,
            0x03 => LoginResponse::Blocked,
            0x04 => LoginResponse::UnknownAccount,
            0x05 => LoginResponse::TakenBack,
            other => {
                return Err(DecodeError::UnknownVariant {
                    packet: "LoginResponse",
                    value: other as u32,
                })
            }
        };
        Ok(response)
    }

    /// Server side: parse a login request.
    pub fn decode_request(
        reader: &mut PacketReader<'_>,
    ) -> std::result::Result<LoginRequest, DecodeError> {
        let bot = reader.read_qq()?;
        reader.discard_exact(FIX_VER2.len())?;
        Ok(LoginRequest {
            bot,
            timestamp: reader.read_u32()?,
            nonce: reader.read_array()?,
            proof: reader.read_array()?,
        })
    }
}

/// A login request as seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub bot: u32,
    pub timestamp: u32,
    pub nonce: [u8; LOGIN_NONCE_SIZE],
    pub proof: [u8; 32],
}

impl LoginRequest {
    /// Whether the proof was produced from `password`
    pub fn verify(&self, password: &str) -> bool {
        derive(PROOF_LABEL, &password_digest(password), &self.nonce) == self.proof
    }

    /// Key the server seals the session key with
    pub fn login_key(&self, password: &str) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(derive(KEY_LABEL, &password_digest(password), &self.nonce))
    }
}

/// Decoded login response
#[derive(Debug, Clone)]
pub enum LoginResponse {
    Success(SessionKey),
    WrongPassword,
    CaptchaRequired,
    Blocked,
    UnknownAccount,
    TakenBack,
}

impl LoginResponse {
    /// Server side: encode the response body. A success seals its key with `login_key`.
    pub fn encode_body(&self, login_key: &[u8; KEY_SIZE]) -> Result<Bytes> {
        let mut writer = PacketWriter::new();
        match self {
            LoginResponse::Success(key) => {
                writer.write_u8(0x00);
                writer.write_bytes(&key.cipher().seal(login_key, key.as_bytes())?);
            }
            LoginResponse::WrongPassword => writer.write_u8(0x01),
            LoginResponse::CaptchaRequired => writer.write_u8(0x02),
            LoginResponse::Blocked => writer.write_u8(0x03),
            LoginResponse::UnknownAccount => writer.write_u8(0x04),
            LoginResponse::TakenBack => writer.write_u8(0x05),
        }
        Ok(writer.freeze())
    }
}

/// Outcome of one login attempt. Terminal for that attempt; retry policy
/// belongs to the caller.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    /// Session key installed, handler active
    Success,
    WrongPassword,
    /// The server wants a captcha solved first
    CaptchaRequired,
    Blocked,
    UnknownAccount,
    /// The account was reclaimed by its owner
    TakenBack,
    /// No answer within the login timeout
    Timeout,
    /// Transport failure while connecting or during the handshake
    NetworkError(String),
    /// The server answered with something that is not a login response
    InvalidResponse(String),
    /// Status byte this client does not know
    Unknown(u8),
}

impl LoginResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginResult::Success)
    }
}

impl fmt::Display for LoginResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginResult::Success => write!(f, "success"),
            LoginResult::WrongPassword => write!(f, "wrong password"),
            LoginResult::CaptchaRequired => write!(f, "captcha required"),
            LoginResult::Blocked => write!(f, "account blocked"),
            LoginResult::UnknownAccount => write!(f, "unknown account"),
            LoginResult::TakenBack => write!(f, "account taken back"),
            LoginResult::Timeout => write!(f, "timed out"),
            LoginResult::NetworkError(e) => write!(f, "network error: {e}"),
            LoginResult::InvalidResponse(e) => write!(f, "invalid response: {e}"),
            LoginResult::Unknown(code) => write!(f, "unknown status {code:#04x}"),
        }
    }
}

use log::{debug, info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use thiserror::Error;

use crate::{
    constants::BINARY_INFORM_PATH,
    fus::{FusClientBuilder, FusError},
    message::ProtocolMessage,
};

/// Number of digits in a type allocation code
pub const TAC_LEN: usize = 8;
/// Number of digits in a full IMEI, including the check digit
pub const IMEI_LEN: usize = 15;
/// Number of candidate IMEIs to try before giving up
pub const MAX_ATTEMPTS: usize = 5;

const FIRST_DIGITS: &[u8] = &[0, 5, 7];
const THIRD_DIGITS: &[u8] = &[0, 1, 3, 5, 6, 7];

#[derive(Debug, Error)]
pub enum ImeiError {
    #[error("TAC must be exactly {TAC_LEN} digits: {0:?}")]
    InvalidTac(String),
    #[error("No valid IMEI found after {MAX_ATTEMPTS} attempts")]
    NoValidImei,
    #[error("FUS error: {0}")]
    Fus(#[from] FusError),
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Compute the Luhn check digit that should be appended to `digits`.
///
/// Non-digit characters are not accepted and the caller is responsible for
/// validating the input.
pub fn luhn_checksum(digits: &str) -> u8 {
    // With the check digit appended, every second digit counting back from
    // the one just before it is doubled
    let parity = (digits.len() + 1) % 2;

    let sum: u32 = digits.bytes()
        .enumerate()
        .map(|(i, b)| {
            let mut d = u32::from(b - b'0');
            if i % 2 == parity {
                d *= 2;
                if d > 9 {
                    d -= 9;
                }
            }
            d
        })
        .sum();

    ((10 - sum % 10) % 10) as u8
}

/// Whether `imei` is 15 digits with a correct check digit.
pub fn is_valid_imei(imei: &str) -> bool {
    imei.len() == IMEI_LEN
        && is_digits(imei)
        && luhn_checksum(&imei[..IMEI_LEN - 1]) == imei.as_bytes()[IMEI_LEN - 1] - b'0'
}

/// Generate a random IMEI with the given TAC prefix. The serial digits are
/// drawn from the ranges seen in real devices.
pub fn generate_imei<R: Rng + ?Sized>(tac: &str, rng: &mut R) -> Result<String, ImeiError> {
    if tac.len() != TAC_LEN || !is_digits(tac) {
        return Err(ImeiError::InvalidTac(tac.to_owned()));
    }

    let mut imei = String::with_capacity(IMEI_LEN);
    imei.push_str(tac);

    let digits = [
        *FIRST_DIGITS.choose(rng).unwrap_or(&0),
        rng.gen_range(4..=9),
        *THIRD_DIGITS.choose(rng).unwrap_or(&0),
        rng.gen_range(0..=9),
        rng.gen_range(0..=9),
        rng.gen_range(0..=9),
    ];
    for d in digits {
        imei.push(char::from(b'0' + d));
    }

    let check = luhn_checksum(&imei);
    imei.push(char::from(b'0' + check));

    Ok(imei)
}

/// Find an IMEI with the given TAC that the server accepts for `version`.
///
/// Each candidate is probed with a binary inform request over a brand new
/// session. The first candidate that gets a FUS status of 200 is returned.
/// Errors from individual probes are logged and count as a failed attempt.
pub async fn validate_tac(
    builder: &FusClientBuilder,
    tac: &str,
    version: &str,
    model: &str,
    region: &str,
) -> Result<String, ImeiError> {
    let mut rng = StdRng::from_entropy();

    for attempt in 1..=MAX_ATTEMPTS {
        let imei = generate_imei(tac, &mut rng)?;
        debug!("Attempt {attempt}: probing IMEI {imei}");

        let result: Result<_, FusError> = async {
            let mut client = builder.connect().await?;
            let nonce = client.nonce()?;
            let msg = ProtocolMessage::binary_inform(version, model, region, &imei, &nonce);
            client.send_message(BINARY_INFORM_PATH, &msg).await
        }.await;

        match result {
            Ok(_) => {
                info!("Attempt {attempt}: found valid IMEI {imei}");
                return Ok(imei);
            }
            Err(FusError::FusBadResponse(status)) => {
                warn!("Attempt {attempt}: IMEI {imei} rejected with status {status}");
            }
            Err(e) => {
                warn!("Attempt {attempt}: error while validating IMEI: {e}");
            }
        }
    }

    Err(ImeiError::NoValidImei)
}

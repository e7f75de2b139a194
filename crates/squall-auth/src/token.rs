use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of every opaque token the authority mints.
pub const TOKEN_LENGTH: usize = 128;

/// A fresh random alphanumeric token.
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

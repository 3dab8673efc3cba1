use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid key encoding: {0}")]
    InvalidKey(#[from] hex::FromHexError),

    #[error("Invalid ciphertext encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Decrypted content is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("At least one recipient public key is required")]
    NoRecipients,

    #[error("Malformed envelope")]
    MalformedEnvelope,
}

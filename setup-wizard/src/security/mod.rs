// Encryption-at-rest for the saved form + content fingerprints for logs

pub mod crypto;
pub mod secret_protector;

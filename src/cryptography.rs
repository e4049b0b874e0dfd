use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use spake2::{Ed25519Group, Identity, Password, Spake2};
use zeroize::Zeroizing;

use crate::errors::{Error, Result};
use crate::password::TransferPassword;
use crate::{ENCRYPTION_OVERHEAD, KEY_SIZE, NONCE_SIZE, SALT_SIZE};

/// Creates the PAKE session identity from the relay slot id.
///
/// The identity is derived by hashing the slot id with SHA256, so a sender
/// and receiver holding the same password compute the same identity. Both
/// sides must agree on it for the SPAKE2 exchange to converge.
pub fn create_session_identity(slot: u16) -> Identity {
    let mut hasher = Sha256::default();
    hasher.update(slot.to_le_bytes());
    Identity::new(&hasher.finalize())
}

/// Starts the SPAKE2 exchange for one side.
///
/// SPAKE2 lets two parties turn the low-entropy password into a high-entropy
/// shared secret over an insecure channel; an eavesdropper who captures both
/// blobs still cannot derive the key without the password.
///
/// Returns the in-progress state and the one blob to hand to the peer.
pub fn start_pake(
    password: &TransferPassword,
    identity: &Identity,
) -> (Spake2<Ed25519Group>, Vec<u8>) {
    let pw = Password::new(password.pake_input());
    Spake2::<Ed25519Group>::start_symmetric(&pw, identity)
}

/// The symmetric material both peers hold after a successful PAKE.
///
/// Exactly 32 bytes of HKDF output; the first 16 bytes double as the session
/// salt that is bound to every frame. Held in zeroizing storage so teardown
/// wipes it.
pub struct SessionKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SessionKey {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn salt(&self) -> Zeroizing<[u8; SALT_SIZE]> {
        let mut salt = Zeroizing::new([0u8; SALT_SIZE]);
        salt.copy_from_slice(&self.key[..SALT_SIZE]);
        salt
    }

    #[cfg(test)]
    pub fn from_raw(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

/// Completes the PAKE exchange and derives the session key.
///
/// The SPAKE2 shared secret is stretched through HKDF-SHA256 into the final
/// 32-byte key. Fails with [`Error::Pake`] if the peer's blob is malformed.
/// Note that a mismatched password does not fail here; it yields a different
/// key on each side, which surfaces as [`Error::Auth`] on the first
/// encrypted frame.
pub fn derive_session_key(spake: Spake2<Ed25519Group>, inbound: &[u8]) -> Result<SessionKey> {
    let shared_secret = spake.finish(inbound).map_err(|_| Error::Pake)?;

    let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_ref());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(b"tran-session-key", key.as_mut_slice())
        .expect("32 bytes is a valid length for HKDF");

    Ok(SessionKey { key })
}

/// Authenticated frame encryption for one session.
///
/// ChaCha20-Poly1305 with a fresh random 12-byte nonce per frame, prepended
/// to the ciphertext, and the session salt bound as associated data. Any
/// tampering fails the Poly1305 tag check on decrypt; callers must treat
/// that as fatal for the session.
pub struct Crypt {
    cipher: ChaCha20Poly1305,
    salt: Zeroizing<[u8; SALT_SIZE]>,
}

impl Crypt {
    pub fn new(session: &SessionKey) -> Self {
        let cipher = ChaCha20Poly1305::new(session.key().into());
        Self {
            cipher,
            salt: session.salt(),
        }
    }

    /// Encrypt one frame. Output is `nonce || ciphertext || tag`, so the
    /// result is exactly `ENCRYPTION_OVERHEAD` bytes longer than the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: self.salt.as_ref(),
                },
            )
            .map_err(|_| Error::Auth)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt one frame produced by [`encrypt`](Crypt::encrypt).
    ///
    /// Fails closed with [`Error::Auth`] on truncation, tag mismatch or a
    /// foreign key.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < ENCRYPTION_OVERHEAD {
            return Err(Error::Auth);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.salt.as_ref(),
                },
            )
            .map_err(|_| Error::Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::TransferPassword;

    fn test_password() -> TransferPassword {
        TransferPassword::parse("7-otter-basil").unwrap()
    }

    fn crypt_pair() -> (Crypt, Crypt) {
        let password = test_password();
        let identity = create_session_identity(password.slot());

        let (sender_spake, sender_blob) = start_pake(&password, &identity);
        let (receiver_spake, receiver_blob) = start_pake(&password, &identity);

        let sender_key = derive_session_key(sender_spake, &receiver_blob).unwrap();
        let receiver_key = derive_session_key(receiver_spake, &sender_blob).unwrap();

        (Crypt::new(&sender_key), Crypt::new(&receiver_key))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let crypt = Crypt::new(&SessionKey::from_raw([0u8; KEY_SIZE]));
        let plaintext = b"Hello, World! This is a test message.";

        let sealed = crypt.encrypt(plaintext).expect("encryption should succeed");
        assert_eq!(sealed.len(), plaintext.len() + ENCRYPTION_OVERHEAD);

        let opened = crypt.decrypt(&sealed).expect("decryption should succeed");
        assert_eq!(&opened[..], plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let crypt1 = Crypt::new(&SessionKey::from_raw([0u8; KEY_SIZE]));
        let crypt2 = Crypt::new(&SessionKey::from_raw([1u8; KEY_SIZE]));

        let sealed = crypt1.encrypt(b"secret message").unwrap();
        assert!(matches!(crypt2.decrypt(&sealed), Err(Error::Auth)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypt = Crypt::new(&SessionKey::from_raw([9u8; KEY_SIZE]));
        let mut sealed = crypt.encrypt(b"important data").unwrap();

        sealed[NONCE_SIZE + 2] ^= 0xFF;
        assert!(matches!(crypt.decrypt(&sealed), Err(Error::Auth)));
    }

    #[test]
    fn tampered_auth_tag_fails() {
        let crypt = Crypt::new(&SessionKey::from_raw([88u8; KEY_SIZE]));
        let mut sealed = crypt.encrypt(b"authenticated data").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(crypt.decrypt(&sealed), Err(Error::Auth)));
    }

    #[test]
    fn truncated_frame_fails() {
        let crypt = Crypt::new(&SessionKey::from_raw([99u8; KEY_SIZE]));
        let sealed = crypt.encrypt(b"data to be truncated").unwrap();

        assert!(matches!(
            crypt.decrypt(&sealed[..sealed.len() - 5]),
            Err(Error::Auth)
        ));
        assert!(matches!(crypt.decrypt(&sealed[..4]), Err(Error::Auth)));
    }

    #[test]
    fn encrypt_empty_frame() {
        let crypt = Crypt::new(&SessionKey::from_raw([42u8; KEY_SIZE]));
        let sealed = crypt.encrypt(b"").unwrap();
        assert_eq!(sealed.len(), ENCRYPTION_OVERHEAD);
        assert_eq!(crypt.decrypt(&sealed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn fresh_nonce_per_frame() {
        let crypt = Crypt::new(&SessionKey::from_raw([77u8; KEY_SIZE]));
        let plaintext = b"same plaintext both times";

        let sealed1 = crypt.encrypt(plaintext).unwrap();
        let sealed2 = crypt.encrypt(plaintext).unwrap();
        assert_ne!(sealed1, sealed2, "each frame should use a fresh nonce");
    }

    #[test]
    fn pake_blobs_are_unique() {
        let password = test_password();
        let identity = create_session_identity(password.slot());

        let (_spake1, blob1) = start_pake(&password, &identity);
        let (_spake2, blob2) = start_pake(&password, &identity);

        assert!(!blob1.is_empty());
        assert_ne!(blob1, blob2, "PAKE blobs carry random ephemeral keys");
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let password = test_password();
        let identity = create_session_identity(password.slot());

        let (sender_spake, sender_blob) = start_pake(&password, &identity);
        let (receiver_spake, receiver_blob) = start_pake(&password, &identity);

        let sender_key = derive_session_key(sender_spake, &receiver_blob).unwrap();
        let receiver_key = derive_session_key(receiver_spake, &sender_blob).unwrap();

        assert_eq!(sender_key.key(), receiver_key.key());
        assert_eq!(sender_key.key().len(), KEY_SIZE);
    }

    #[test]
    fn derived_keys_enable_frame_exchange() {
        let (sender_crypt, receiver_crypt) = crypt_pair();

        let sealed = sender_crypt.encrypt(b"secure file transfer data").unwrap();
        let opened = receiver_crypt.decrypt(&sealed).unwrap();
        assert_eq!(&opened[..], b"secure file transfer data");
    }

    #[test]
    fn mismatched_passwords_fail_on_first_frame() {
        let sender_password = TransferPassword::parse("7-otter-basil").unwrap();
        let receiver_password = TransferPassword::parse("7-otter-kettle").unwrap();
        let identity = create_session_identity(7);

        let (sender_spake, sender_blob) = start_pake(&sender_password, &identity);
        let (receiver_spake, receiver_blob) = start_pake(&receiver_password, &identity);

        let sender_key = derive_session_key(sender_spake, &receiver_blob).unwrap();
        let receiver_key = derive_session_key(receiver_spake, &sender_blob).unwrap();

        // Derivation succeeds on both sides, but the keys differ and the
        // first frame fails to authenticate.
        assert_ne!(sender_key.key(), receiver_key.key());

        let sender_crypt = Crypt::new(&sender_key);
        let receiver_crypt = Crypt::new(&receiver_key);
        let sealed = receiver_crypt.encrypt(b"receiver handshake").unwrap();
        assert!(matches!(sender_crypt.decrypt(&sealed), Err(Error::Auth)));
    }

    #[test]
    fn session_salt_is_key_prefix() {
        let key = SessionKey::from_raw([5u8; KEY_SIZE]);
        assert_eq!(key.salt().as_ref(), &[5u8; SALT_SIZE]);
    }
}

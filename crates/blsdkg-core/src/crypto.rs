//! Identity crypto and curve (un)marshalling
//!
//! Operators authenticate envelopes with RSASSA-PKCS1-v1_5 over SHA-256 of
//! the canonical message bytes; roster keys travel as PKIX/SPKI DER. Share
//! material lives on BLS12-381: scalars are 32 bytes big-endian on the wire,
//! G1 points 48 bytes compressed. Every point or scalar that crosses a codec
//! boundary goes through the checked paths here.

use bls12_381::{G1Affine, Scalar};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Wire size of a BLS12-381 scalar
pub const SCALAR_SIZE: usize = 32;
/// Wire size of a compressed G1 point
pub const POINT_SIZE: usize = 48;

/// Sign `msg` under the operator identity key.
pub fn sign_rsa(key: &RsaPrivateKey, msg: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(msg);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Verify an operator identity signature over `msg`.
pub fn verify_rsa(key: &RsaPublicKey, msg: &[u8], sig: &[u8]) -> Result<()> {
    let digest = Sha256::digest(msg);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, sig)
        .map_err(|_| Error::InvalidSignature)
}

/// Parse a PKIX/SPKI DER encoded RSA public key.
pub fn parse_rsa_pub(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Encode an RSA public key as PKIX/SPKI DER, the form roster entries carry.
pub fn encode_rsa_pub(key: &RsaPublicKey) -> Result<Vec<u8>> {
    Ok(key
        .to_public_key_der()
        .map_err(|e| Error::InvalidKey(e.to_string()))?
        .as_bytes()
        .to_vec())
}

/// Encrypt a deal share to a recipient's roster key (OAEP/SHA-256).
pub fn encrypt_to(key: &RsaPublicKey, msg: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), msg)
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Decrypt a deal share addressed to this operator.
pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Marshal a scalar in its big-endian wire form.
pub fn scalar_to_bytes(s: &Scalar) -> [u8; SCALAR_SIZE] {
    let mut out = s.to_bytes();
    out.reverse();
    out
}

/// Unmarshal a big-endian scalar; rejects values outside the field.
pub fn scalar_from_bytes(bytes: &[u8; SCALAR_SIZE]) -> Result<Scalar> {
    let mut le = *bytes;
    le.reverse();
    Option::<Scalar>::from(Scalar::from_bytes(&le))
        .ok_or_else(|| Error::Malformed("scalar out of field range".into()))
}

/// Marshal a G1 point compressed.
pub fn point_to_bytes(p: &G1Affine) -> [u8; POINT_SIZE] {
    p.to_compressed()
}

/// Unmarshal a compressed G1 point; rejects off-curve and wrong-subgroup
/// encodings.
pub fn point_from_bytes(bytes: &[u8; POINT_SIZE]) -> Result<G1Affine> {
    Option::<G1Affine>::from(G1Affine::from_compressed(bytes))
        .ok_or_else(|| Error::Malformed("invalid G1 point".into()))
}

/// Unmarshal a compressed G1 point from an unchecked slice.
pub fn point_from_slice(bytes: &[u8]) -> Result<G1Affine> {
    let arr: [u8; POINT_SIZE] = bytes
        .try_into()
        .map_err(|_| Error::Malformed(format!("G1 point must be {POINT_SIZE} bytes")))?;
    point_from_bytes(&arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static KEY: Lazy<RsaPrivateKey> =
        Lazy::new(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("rsa keygen"));

    #[test]
    fn test_sign_verify_roundtrip() {
        let pubkey = KEY.to_public_key();
        let sig = sign_rsa(&KEY, b"hello operators").unwrap();

        verify_rsa(&pubkey, b"hello operators", &sig).unwrap();
        assert!(matches!(
            verify_rsa(&pubkey, b"hello 0perators", &sig),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn test_pubkey_der_roundtrip() {
        let pubkey = KEY.to_public_key();
        let der = encode_rsa_pub(&pubkey).unwrap();
        let parsed = parse_rsa_pub(&der).unwrap();
        assert_eq!(pubkey, parsed);
    }

    #[test]
    fn test_parse_pubkey_garbage() {
        assert!(matches!(parse_rsa_pub(&[0x30, 0x01, 0xff]), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_oaep_roundtrip() {
        let pubkey = KEY.to_public_key();
        let ct = encrypt_to(&pubkey, &[7u8; 32]).unwrap();
        assert_eq!(decrypt(&KEY, &ct).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_scalar_big_endian() {
        let five = Scalar::from(5u64);
        let bytes = scalar_to_bytes(&five);
        assert_eq!(bytes[31], 5);
        assert_eq!(&bytes[..31], &[0u8; 31]);
        assert_eq!(scalar_from_bytes(&bytes).unwrap(), five);
    }

    #[test]
    fn test_scalar_rejects_out_of_range() {
        // -1 mod p is in range, all-ones is not
        assert!(scalar_from_bytes(&[0xff; SCALAR_SIZE]).is_err());
    }

    #[test]
    fn test_point_roundtrip() {
        let gen = G1Affine::generator();
        let bytes = point_to_bytes(&gen);
        assert_eq!(point_from_bytes(&bytes).unwrap(), gen);
    }

    #[test]
    fn test_point_rejects_garbage() {
        assert!(point_from_slice(&[0u8; POINT_SIZE]).is_err());
        assert!(point_from_slice(&[1u8; 47]).is_err());
    }
}

//! Feldman verifiable secret sharing over G1
//!
//! Shamir sharing extended with curve commitments: a dealer publishes
//! `C_k = g^{a_k}` for each polynomial coefficient, so a recipient can check
//! its share `f(x)` against `Π C_k^{x^k}` without learning the secret.

use bls12_381::{G1Affine, G1Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{CryptoRng, RngCore};

/// Generate a random polynomial of degree `threshold - 1` with the given
/// constant term.
///
/// Returns coefficients `[a_0, a_1, ..., a_{t-1}]` where `a_0` is the secret.
pub fn generate_polynomial<R: RngCore + CryptoRng>(
    secret: &Scalar,
    threshold: usize,
    rng: &mut R,
) -> Vec<Scalar> {
    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(*secret);

    for _ in 1..threshold {
        let mut bytes = [0u8; 64];
        rng.fill_bytes(&mut bytes);
        coefficients.push(Scalar::from_bytes_wide(&bytes));
    }

    coefficients
}

/// Evaluate a polynomial at `x` using Horner's method.
pub fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    let mut result = Scalar::ZERO;
    for coeff in coefficients.iter().rev() {
        result = result * x + coeff;
    }
    result
}

/// Commit to every polynomial coefficient: `C_k = g^{a_k}`.
pub fn generate_commitments(coefficients: &[Scalar]) -> Vec<G1Affine> {
    coefficients
        .iter()
        .map(|coeff| (G1Projective::generator() * coeff).to_affine())
        .collect()
}

/// Evaluate a commitment vector at `x`: `Π C_k^{x^k}` (the commitment to
/// `f(x)`).
pub fn evaluate_commitments(commitments: &[G1Affine], x: &Scalar) -> G1Projective {
    let mut result = G1Projective::identity();
    for commitment in commitments.iter().rev() {
        result = result * x + commitment;
    }
    result
}

/// Verify a share for evaluation point `index` against the dealer's
/// commitments: `g^{share} == Π C_k^{index^k}`.
pub fn verify_share(share: &Scalar, index: u64, commitments: &[G1Affine]) -> bool {
    let lhs = G1Projective::generator() * share;
    let rhs = evaluate_commitments(commitments, &Scalar::from(index));
    lhs == rhs
}

/// Lagrange coefficient at zero for evaluation point `i` over the point set
/// `ids`: `λ_i = Π_{j≠i} x_j / (x_j − x_i)`.
///
/// Returns `None` if `ids` contains duplicates (zero denominator).
pub fn lagrange_at_zero(ids: &[u64], i: u64) -> Option<Scalar> {
    let x_i = Scalar::from(i);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &j in ids {
        if j == i {
            continue;
        }
        let x_j = Scalar::from(j);
        numerator *= x_j;
        denominator *= x_j - x_i;
    }

    let inverse = denominator.invert();
    if inverse.is_none().into() {
        return None;
    }
    Some(numerator * inverse.unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn random_scalar() -> Scalar {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        Scalar::from_bytes_wide(&bytes)
    }

    #[test]
    fn test_polynomial_evaluation() {
        // f(x) = 5 + 3x + 2x^2
        let coeffs = vec![Scalar::from(5u64), Scalar::from(3u64), Scalar::from(2u64)];

        assert_eq!(evaluate_polynomial(&coeffs, &Scalar::ZERO), Scalar::from(5u64));
        assert_eq!(evaluate_polynomial(&coeffs, &Scalar::ONE), Scalar::from(10u64));
        assert_eq!(
            evaluate_polynomial(&coeffs, &Scalar::from(2u64)),
            Scalar::from(19u64)
        );
    }

    #[test]
    fn test_share_verification() {
        let secret = random_scalar();
        let coeffs = generate_polynomial(&secret, 3, &mut OsRng);
        let commitments = generate_commitments(&coeffs);

        for i in 1..=5u64 {
            let share = evaluate_polynomial(&coeffs, &Scalar::from(i));
            assert!(verify_share(&share, i, &commitments));
            assert!(!verify_share(&(share + Scalar::ONE), i, &commitments));
        }
    }

    #[test]
    fn test_lagrange_reconstruction() {
        let secret = random_scalar();
        let coeffs = generate_polynomial(&secret, 3, &mut OsRng);

        // any 3 of the 5 evaluation points recover f(0)
        for ids in [[1u64, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let mut recovered = Scalar::ZERO;
            for &i in &ids {
                let share = evaluate_polynomial(&coeffs, &Scalar::from(i));
                recovered += lagrange_at_zero(&ids, i).unwrap() * share;
            }
            assert_eq!(recovered, secret);
        }
    }

    #[test]
    fn test_lagrange_rejects_duplicates() {
        assert!(lagrange_at_zero(&[1, 2, 2], 1).is_none());
    }
}

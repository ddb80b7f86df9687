// Coordinate transformations for FOC (Field Oriented Control)
// Clarke/Park transforms and their inverses, plus dq voltage limiting

use libm::{cosf, fmodf, sinf, sqrtf};

// Enable idsp-based fast trigonometric functions
const USE_IDSP_COSSIN: bool = true;

const FRAC_1_SQRT3: f32 = 0.577_350_27; // 1 / sqrt(3)
const SQRT3_DIV_2: f32 = 0.866_025_4; // sqrt(3) / 2

/// Compute (cos, sin) of an electrical angle in radians.
///
/// Uses idsp::cossin() for fast trigonometric calculation (~40 cycles on
/// Cortex-M) compared to libm::cosf/sinf (~100-200 cycles). Can be switched
/// via USE_IDSP_COSSIN.
#[inline]
fn cos_sin(theta: f32) -> (f32, f32) {
    if USE_IDSP_COSSIN {
        cos_sin_idsp(theta)
    } else {
        (cosf(theta), sinf(theta))
    }
}

/// cos/sin via idsp::cossin() (fast path)
#[inline]
fn cos_sin_idsp(theta: f32) -> (f32, f32) {
    // idsp uses i32::MIN (-2^31) to i32::MAX (2^31-1) to represent -π to π,
    // so normalize theta from [0, 2π] to [-π, π] first.
    use core::f32::consts::{PI, TAU};
    let normalized_theta = if theta > PI { theta - TAU } else { theta };

    // Scale to i32 range: phase = normalized_theta * (2^31 / π)
    const SCALE: f32 = 2147483648.0 / core::f32::consts::PI;
    let phase: i32 = (normalized_theta * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    // Convert i32 to f32 and normalize to [-1.0, 1.0]
    const I32_TO_F32: f32 = 1.0 / 2147483648.0; // 1 / 2^31
    (cos_i32 as f32 * I32_TO_F32, sin_i32 as f32 * I32_TO_F32)
}

/// Clarke transformation (abc → αβ)
///
/// Maps balanced three-phase quantities into the two-axis stationary frame.
/// Amplitude-invariant form: `alpha = a`, `beta = (b - c) / sqrt(3)`.
///
/// # Arguments
/// * `a`, `b`, `c` - Instantaneous phase quantities (balanced, a + b + c ≈ 0)
///
/// # Returns
/// Tuple of (alpha, beta) in the stationary frame
pub fn clarke(a: f32, b: f32, c: f32) -> (f32, f32) {
    let alpha = a;
    let beta = FRAC_1_SQRT3 * (b - c);
    (alpha, beta)
}

/// Inverse Clarke transformation (αβ → abc/uvw)
///
/// Transforms from the stationary αβ frame to three-phase quantities.
/// The three outputs always sum to zero.
///
/// # Arguments
/// * `v_alpha` - Alpha-axis quantity
/// * `v_beta` - Beta-axis quantity
///
/// # Returns
/// Tuple of (v_a, v_b, v_c) three-phase quantities
pub fn inverse_clarke(v_alpha: f32, v_beta: f32) -> (f32, f32, f32) {
    let v_a = v_alpha;
    let v_b = -0.5 * v_alpha + SQRT3_DIV_2 * v_beta;
    let v_c = -0.5 * v_alpha - SQRT3_DIV_2 * v_beta;

    (v_a, v_b, v_c)
}

/// Park transformation (αβ → dq)
///
/// Rotates the stationary αβ frame into the rotating dq frame aligned with
/// the rotor flux.
///
/// # Arguments
/// * `alpha` - Alpha-axis quantity
/// * `beta` - Beta-axis quantity
/// * `theta` - Electrical angle in radians
///
/// # Returns
/// Tuple of (d, q) in the rotating frame
pub fn park(alpha: f32, beta: f32, theta: f32) -> (f32, f32) {
    let (cos_theta, sin_theta) = cos_sin(theta);

    let d = alpha * cos_theta + beta * sin_theta;
    let q = -alpha * sin_theta + beta * cos_theta;

    (d, q)
}

/// Inverse Park transformation (dq → αβ)
///
/// Transforms from the rotating dq reference frame to the stationary αβ frame.
///
/// # Arguments
/// * `vd` - d-axis quantity (aligned with rotor flux)
/// * `vq` - q-axis quantity (perpendicular to rotor flux, produces torque)
/// * `theta` - Electrical angle in radians
///
/// # Returns
/// Tuple of (v_alpha, v_beta) in the stationary frame
pub fn inverse_park(vd: f32, vq: f32, theta: f32) -> (f32, f32) {
    let (cos_theta, sin_theta) = cos_sin(theta);

    let v_alpha = vd * cos_theta - vq * sin_theta;
    let v_beta = vd * sin_theta + vq * cos_theta;

    (v_alpha, v_beta)
}

/// Limit voltage vector to maximum magnitude
///
/// Applies circular limiting to the voltage vector in the dq frame
/// to ensure the magnitude doesn't exceed the maximum voltage.
///
/// # Arguments
/// * `vd` - d-axis voltage
/// * `vq` - q-axis voltage
/// * `max_voltage` - Maximum allowed voltage magnitude
///
/// # Returns
/// Tuple of (vd_limited, vq_limited)
pub fn limit_voltage(vd: f32, vq: f32, max_voltage: f32) -> (f32, f32) {
    let magnitude = sqrtf(vd * vd + vq * vq);

    if magnitude > max_voltage {
        // Scale down both components proportionally
        let scale = max_voltage / magnitude;
        (vd * scale, vq * scale)
    } else {
        (vd, vq)
    }
}

/// Normalize angle to range [0, 2π)
///
/// # Arguments
/// * `angle` - Angle in radians
///
/// # Returns
/// Normalized angle in range [0, 2π)
pub fn normalize_angle(angle: f32) -> f32 {
    use core::f32::consts::TAU;

    // fmodf is exact, so this stays in range for arbitrarily large inputs
    let wrapped = fmodf(angle, TAU);
    let normalized = if wrapped < 0.0 { wrapped + TAU } else { wrapped };
    // Adding 2π to a tiny negative remainder can round to exactly 2π
    if normalized >= TAU {
        0.0
    } else {
        normalized
    }
}

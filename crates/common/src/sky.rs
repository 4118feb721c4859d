//! Sky geometry for positional matching
//!
//! Positions are equatorial (ra, dec) in degrees, J2000. Separations are
//! great-circle distances; a planar difference in ra would over-count
//! separations away from the equator and break down entirely near the poles.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// An angle stored in degrees
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Angle(f64);

impl Angle {
    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees)
    }

    pub fn from_arcsec(arcsec: f64) -> Self {
        Self(arcsec / ARCSEC_PER_DEGREE)
    }

    pub fn degrees(&self) -> f64 {
        self.0
    }

    pub fn arcsec(&self) -> f64 {
        self.0 * ARCSEC_PER_DEGREE
    }
}

/// Equatorial position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    /// Validate and build a position.
    ///
    /// `ra` must lie in [0, 360] (360 wraps to 0) and `dec` in [-90, 90].
    pub fn new(ra: f64, dec: f64) -> Result<Self> {
        Self::named("<candidate>", ra, dec)
    }

    /// Same as [`SkyPosition::new`], naming the offending target in the error
    pub fn named(target: &str, ra: f64, dec: f64) -> Result<Self> {
        let valid = ra.is_finite()
            && dec.is_finite()
            && (0.0..=360.0).contains(&ra)
            && (-90.0..=90.0).contains(&dec);

        if !valid {
            return Err(AppError::MalformedPosition {
                target: target.to_string(),
                ra,
                dec,
            });
        }

        let ra = if ra == 360.0 { 0.0 } else { ra };
        Ok(Self { ra, dec })
    }

    /// Great-circle separation (Vincenty formula)
    pub fn separation(&self, other: &SkyPosition) -> Angle {
        let (ra1, dec1) = (self.ra.to_radians(), self.dec.to_radians());
        let (ra2, dec2) = (other.ra.to_radians(), other.dec.to_radians());
        let delta_ra = ra2 - ra1;

        let (sin_dec1, cos_dec1) = dec1.sin_cos();
        let (sin_dec2, cos_dec2) = dec2.sin_cos();
        let (sin_dra, cos_dra) = delta_ra.sin_cos();

        let num1 = cos_dec2 * sin_dra;
        let num2 = cos_dec1 * sin_dec2 - sin_dec1 * cos_dec2 * cos_dra;
        let denominator = sin_dec1 * sin_dec2 + cos_dec1 * cos_dec2 * cos_dra;

        Angle::from_degrees(num1.hypot(num2).atan2(denominator).to_degrees())
    }

    /// True when `other` lies on or inside the cone of `radius` around self
    pub fn within(&self, other: &SkyPosition, radius: Angle) -> bool {
        self.separation(other).degrees() <= radius.degrees()
    }

    /// Round both coordinates to a fixed number of decimal places
    pub fn rounded(&self, decimals: u32) -> SkyPosition {
        let scale = 10f64.powi(decimals as i32);
        let ra = (self.ra * scale).round() / scale;
        SkyPosition {
            ra: if ra >= 360.0 { ra - 360.0 } else { ra },
            dec: (self.dec * scale).round() / scale,
        }
    }

    /// Declination band that bounds any cone of `radius` around this position
    pub fn dec_band(&self, radius: Angle) -> (f64, f64) {
        (
            (self.dec - radius.degrees()).max(-90.0),
            (self.dec + radius.degrees()).min(90.0),
        )
    }
}

/// Keep the items whose position falls within `radius` of `center`.
///
/// Input order is preserved.
pub fn cone_filter<T, I, F>(center: &SkyPosition, radius: Angle, items: I, position: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> SkyPosition,
{
    items
        .into_iter()
        .filter(|item| center.within(&position(item), radius))
        .collect()
}

use image::Rgb;
use std::fmt;
use std::str::FromStr;

pub type Vec3 = [f32; 3];

const YUV: [f32; 9] = [
    0.299, 0.587, 0.114, //
    -0.147, -0.289, 0.436, //
    0.615, -0.515, -0.100,
];

const YIQ: [f32; 9] = [
    0.299, 0.587, 0.114, //
    0.595716, -0.274453, -0.321263, //
    0.211456, -0.522591, 0.311135,
];

const YUV_INV: [f32; 9] = [
    1.0, -0.000039457, 1.139827967, //
    1.0, -0.394610164, -0.580500316, //
    1.0, 2.031999684, -0.000481376,
];

const YIQ_INV: [f32; 9] = [
    1.0, 0.956295720, 0.621024416, //
    1.0, -0.272122099, -0.647380597, //
    1.0, -1.106989017, 1.704614998,
];

/// Linear mapping between RGB and the space color distances are measured in.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colorspace {
    Rgb,
    Yuv,
    #[default]
    Yiq,
}

impl Colorspace {
    pub const ALL: [Colorspace; 3] = [Colorspace::Rgb, Colorspace::Yuv, Colorspace::Yiq];

    pub fn name(&self) -> &'static str {
        match self {
            Colorspace::Rgb => "rgb",
            Colorspace::Yuv => "yuv",
            Colorspace::Yiq => "yiq",
        }
    }

    fn matrix(&self) -> Option<&'static [f32; 9]> {
        match self {
            Colorspace::Rgb => None,
            Colorspace::Yuv => Some(&YUV),
            Colorspace::Yiq => Some(&YIQ),
        }
    }

    fn inverse(&self) -> Option<&'static [f32; 9]> {
        match self {
            Colorspace::Rgb => None,
            Colorspace::Yuv => Some(&YUV_INV),
            Colorspace::Yiq => Some(&YIQ_INV),
        }
    }

    #[inline]
    pub fn from_rgb(&self, rgb: Rgb<u8>) -> Vec3 {
        let v = rgb.0.map(|c| c as f32 / 255.0);
        match self.matrix() {
            Some(m) => mul(m, v),
            None => v,
        }
    }

    /// Maps back to RGB, clamping each channel and rounding to the nearest step.
    pub fn to_rgb(&self, value: Vec3) -> Rgb<u8> {
        let v = match self.inverse() {
            Some(m) => mul(m, value),
            None => value,
        };
        Rgb(v.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
    }
}

impl fmt::Display for Colorspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colorspace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Colorspace::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown colorspace: {s}"))
    }
}

#[inline]
fn mul(m: &[f32; 9], v: Vec3) -> Vec3 {
    [
        m[0] * v[0] + m[1] * v[1] + m[2] * v[2],
        m[3] * v[0] + m[4] * v[1] + m[5] * v[2],
        m[6] * v[0] + m[7] * v[1] + m[8] * v[2],
    ]
}

/// Squared euclidean distance, the closeness measure used everywhere.
#[inline(always)]
pub fn distance_sq(a: &Vec3, b: &Vec3) -> f32 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invert(m: &[f32; 9]) -> [f32; 9] {
        let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
            + m[2] * (m[3] * m[7] - m[4] * m[6]);
        let inv = 1.0 / det;
        [
            (m[4] * m[8] - m[5] * m[7]) * inv,
            (m[2] * m[7] - m[1] * m[8]) * inv,
            (m[1] * m[5] - m[2] * m[4]) * inv,
            (m[5] * m[6] - m[3] * m[8]) * inv,
            (m[0] * m[8] - m[2] * m[6]) * inv,
            (m[2] * m[3] - m[0] * m[5]) * inv,
            (m[3] * m[7] - m[4] * m[6]) * inv,
            (m[1] * m[6] - m[0] * m[7]) * inv,
            (m[0] * m[4] - m[1] * m[3]) * inv,
        ]
    }

    #[test]
    fn inverse_tables_match_forward() {
        for colorspace in Colorspace::ALL {
            let (Some(m), Some(table)) = (colorspace.matrix(), colorspace.inverse()) else {
                continue;
            };
            for (a, b) in invert(m).iter().zip(table) {
                assert!((a - b).abs() < 1e-4, "{colorspace}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn rgb_to_colorspace_and_back() {
        let colors = [
            Rgb([0, 0, 0]),
            Rgb([255, 255, 255]),
            Rgb([137, 243, 54]),
            Rgb([12, 200, 99]),
        ];
        for colorspace in Colorspace::ALL {
            for color in colors {
                let v = colorspace.from_rgb(color);
                assert_eq!(colorspace.to_rgb(v), color, "{colorspace}");
            }
        }
    }

    #[test]
    fn to_rgb_clamps() {
        assert_eq!(Colorspace::Rgb.to_rgb([-0.5, 2.0, 0.5]), Rgb([0, 255, 128]));
    }

    #[test]
    fn luma_is_first_component() {
        let white = Colorspace::Yiq.from_rgb(Rgb([255, 255, 255]));
        assert!((white[0] - 1.0).abs() < 1e-5);
        assert!(white[1].abs() < 1e-5);
        assert!(white[2].abs() < 1e-5);
    }

    #[test]
    fn parse_names() {
        assert_eq!("YIQ".parse::<Colorspace>(), Ok(Colorspace::Yiq));
        assert_eq!("rgb".parse::<Colorspace>(), Ok(Colorspace::Rgb));
        assert!("lab".parse::<Colorspace>().is_err());
    }

    #[test]
    fn distance_is_symmetric() {
        let a = [0.1, 0.2, 0.3];
        let b = [0.3, 0.1, 0.0];
        assert_eq!(distance_sq(&a, &b), distance_sq(&b, &a));
        assert_eq!(distance_sq(&a, &a), 0.0);
    }
}

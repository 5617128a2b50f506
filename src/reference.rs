//! Reference matmul on the host
//!
//! Exact integer product used as ground truth and as the payload of the
//! solution artifact. Accumulation runs in ascending k with two's-complement
//! wraparound, so the result is identical on every platform.

use crate::hardware::BenchConfig;
use crate::seed::Operands;

/// `C[i][j] = sum_k A[i][k] * B[k][j]` in wrapping i32 arithmetic
pub fn matmul(a: &[u8], b: &[i8], config: &BenchConfig) -> Vec<i32> {
    let (rows, cols, k) = (config.rows, config.cols, config.k);
    debug_assert_eq!(a.len(), rows * k);
    debug_assert_eq!(b.len(), k * cols);

    let mut c = vec![0i32; rows * cols];
    for i in 0..rows {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..cols {
            let mut sum = 0i32;
            for (kk, &a_val) in a_row.iter().enumerate() {
                let b_val = b[kk * cols + j];
                sum = sum.wrapping_add(i32::from(a_val) * i32::from(b_val));
            }
            c[i * cols + j] = sum;
        }
    }
    c
}

/// Reference product of a pair of operands
pub fn compute(operands: &Operands, config: &BenchConfig) -> Vec<i32> {
    matmul(&operands.a, &operands.b, config)
}

#[cfg(test)]
pub(crate) const ZERO_SEED_RESULT: [[i32; 16]; 16] = [
    [-1032686, -1161826, -3280423, -2546374, -228793, -3100322, -5397198, -5125281, -2554311, -6624905, -3060857, -1857330, -1196786, 1640580, -2831648, -88230],
    [-1786865, -2912104, -1458275, -1466954, 608285, -2330365, -2138555, -2678122, -332804, -5231038, -2850409, -3537240, -351134, 3515, -3164018, -127509],
    [-1933625, -730191, 424621, -3354470, 135474, -321706, -4013693, -2137168, -2468466, -5832726, -2312595, -2700780, -1186168, 3341015, -3117838, -2669183],
    [-3237448, -2053747, -3709274, 349481, 213469, -4418018, -3132662, -3510447, -1839326, -5064876, -4099170, -1593678, -1479316, -1253084, -920848, -895008],
    [-2795892, -1502266, 846682, -3635565, -356958, -3752943, -1504492, -3245739, -2522767, -5052140, -3620076, -370695, -1734511, 3133584, -2115291, -2176723],
    [-4191282, 13014, -1613687, -3848385, -15055, -1501223, -2141527, -3642937, -3083305, -8338896, -1642192, -2940425, -987545, 2482502, -3001928, -1381568],
    [-2170839, -1358441, -708365, -3923538, 576148, -4772825, -2159723, -4033703, -2629992, -5516482, -2758622, -1719149, -1982659, 2168252, -3053713, 89169],
    [-1322615, -3811023, -1727173, -2581611, -2363468, -1212307, -4389665, -3779128, -212509, -7383918, -2542457, -2039593, -2146827, 1646689, -1354608, -2943697],
    [-3693030, -1628106, -2430424, -1642444, 1284707, -686021, -4403308, -3763268, -1037649, -6183000, -3679430, -1221032, -272553, -592216, -2755376, 69968],
    [1068938, -1968254, -2648785, -1136547, 1067975, -2084423, -2131586, -1366577, -1251532, -8271316, -2083715, -1776180, 274236, 1590621, -418194, -1378950],
    [-3051748, -630668, -1315025, -515154, -2382027, -897833, -2151680, -1603956, -1830157, -7575913, -3238220, -4022431, -3415018, 1482896, -2156992, 262055],
    [-1050056, -3219421, -2204516, -1588108, -2643857, -1788867, -3536171, -3744065, -4345626, -6987419, -3566240, -3530717, -217773, 2866985, -4665191, 232070],
    [-2879268, -3714357, -786083, -3275425, -1852125, -1757194, -4414311, -3601221, -1534169, -5156126, -2949011, -196040, -1100059, 1915389, -1919105, -2514224],
    [-1383956, -953958, -1290779, -1617934, -2452687, -1901338, -5194630, -1058812, -979808, -5466201, -3427259, -3452389, -3629971, 1102461, -2678652, -2057312],
    [-2327734, -1355031, -321219, -1607114, -3591746, -549942, -2117841, -2144419, -2203496, -6091810, -4773031, -1432122, -1894328, 2397082, -515637, -256675],
    [-733260, -3763341, 1927625, -1067417, 366816, -1817418, -4935084, -3732398, -2166074, -7953731, -5539914, -3639126, -1262749, 1543108, -2253124, -362992],
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::expand;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_small_matmul() {
        // [[1, 2], [3, 4]] @ [[5, -6], [7, 8]]
        let config = BenchConfig { rows: 2, cols: 2, k: 2, ..BenchConfig::benchmark() };
        let c = matmul(&[1, 2, 3, 4], &[5, -6, 7, 8], &config);
        assert_eq!(c, vec![19, 10, 43, 14]);
    }

    #[test]
    fn test_zero_seed_golden_result() {
        let config = BenchConfig::benchmark();
        let operands = expand(&[0u8; 240], &config).unwrap();
        let c = compute(&operands, &config);
        let expected: Vec<i32> = ZERO_SEED_RESULT.iter().flatten().copied().collect();
        assert_eq!(c, expected);
    }

    #[test]
    fn test_positive_overflow_wraps() {
        // 255 * 127 * 70016 = 2_267_468_160 exceeds i32::MAX
        let config = BenchConfig::with_shape(1, 1, 70016).unwrap();
        let a = vec![255u8; 70016];
        let b = vec![127i8; 70016];
        assert_eq!(matmul(&a, &b, &config), vec![-2_027_499_136]);
    }

    #[test]
    fn test_negative_overflow_wraps() {
        // 255 * -128 * 70016 = -2_285_322_240 is below i32::MIN
        let config = BenchConfig::with_shape(1, 1, 70016).unwrap();
        let a = vec![255u8; 70016];
        let b = vec![-128i8; 70016];
        assert_eq!(matmul(&a, &b, &config), vec![2_009_645_056]);
    }

    #[test]
    fn test_accumulation_crosses_back_after_wrap() {
        // Overflow in the first half, then back into range in the second:
        // ascending k wraps up and then down to the exact total.
        let config = BenchConfig::with_shape(1, 1, 140032).unwrap();
        let a = vec![255u8; 140032];
        let mut b = vec![127i8; 70016];
        b.extend(std::iter::repeat(-127i8).take(70016));
        assert_eq!(matmul(&a, &b, &config), vec![0]);
    }
}

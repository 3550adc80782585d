use crate::args::RecapParams;

// Round to n significant digits
// https://stackoverflow.com/questions/28655362/how-does-one-round-a-floating-point-number-to-a-specified-number-of-digits
pub fn precision_f64(x: f64, decimals: u32) -> f64 {
    if x == 0. || decimals == 0 {
        0.
    } else {
        let shift = decimals as i32 - x.abs().log10().ceil() as i32;
        let shift_factor = 10_f64.powi(shift);

        (x * shift_factor).round() / shift_factor
    }
}

/// Sanity-check a prior draw before simulating with it. Implausible
/// combinations are reported, not rejected; the demographic constructor
/// only guarantees time ordering.
pub fn check_prior(params: &RecapParams) -> Vec<String> {
    let mut warnings = vec![];
    if params.bottleneck_time_domestic >= params.div_time {
        warnings.push(format!(
            "domestic bottleneck at {} is not before the divergence at {}",
            params.bottleneck_time_domestic, params.div_time
        ));
    }
    if params.bottleneck_time_wild >= params.div_time {
        warnings.push(format!(
            "wild bottleneck at {} is not before the divergence at {}",
            params.bottleneck_time_wild, params.div_time
        ));
    }
    if params.migration_length_2 > params.div_time {
        warnings.push(format!(
            "ancestral migration length {} reaches past the divergence at {}",
            params.migration_length_2, params.div_time
        ));
    }
    if params.pop_size_domestic_2 == 0 || params.pop_size_wild_2 == 0 {
        warnings.push("an ancestral population size is zero".to_string());
    }
    warnings
}

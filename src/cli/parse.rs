use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

const TASK_COUNT_RANGE: RangeInclusive<usize> = 1..=1024;

pub fn parse_task_count(s: &str) -> Result<usize, String> {
    parse_range_inclusive(s, TASK_COUNT_RANGE)
}

fn parse_range_inclusive<N: PartialOrd + FromStr + Display>(
    s: &str,
    range: RangeInclusive<N>,
) -> Result<N, String> {
    let value: N = s
        .parse()
        .map_err(|_| format!("{s:?} is not a valid number"))?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "{value} is outside {}-{}",
            range.start(),
            range.end()
        ))
    }
}

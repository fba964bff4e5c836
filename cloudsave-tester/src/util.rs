use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("no seeds given")]
    Empty,
    #[error("invalid seed '{0}': expected an unsigned integer")]
    Invalid(String),
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

pub fn parse_seeds(s: &str) -> Result<Vec<u64>, SeedError> {
    let seeds = split_csv(s)
        .into_iter()
        .map(|raw| raw.parse::<u64>().map_err(|_| SeedError::Invalid(raw)))
        .collect::<Result<Vec<_>, _>>()?;
    if seeds.is_empty() {
        return Err(SeedError::Empty);
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }

    #[test]
    fn seeds_parse_or_name_the_bad_entry() {
        assert_eq!(parse_seeds("1337, 42"), Ok(vec![1337, 42]));
        assert_eq!(parse_seeds(" , "), Err(SeedError::Empty));
        assert_eq!(
            parse_seeds("1,x"),
            Err(SeedError::Invalid("x".to_string()))
        );
    }
}

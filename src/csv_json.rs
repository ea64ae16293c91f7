use crate::error::Result;
use crate::options::ParseOptions;
use crate::parser::Parser;

/// Parse CSV text and serialize the records as one JSON array.
///
/// Object records become JSON objects keyed by header name, array records
/// become JSON arrays, and sparse records render absent positions as
/// `null`. Size limits and the source label behave exactly as in
/// [`Parser`].
pub fn parse_csv_to_json(input: &str, options: &ParseOptions) -> Result<String> {
    let parser = Parser::new(options.clone())?;
    let records = parser.parse_to_vec(input)?;
    Ok(serde_json::to_string(&records)?)
}

/// Parse binary CSV input and serialize the records as one JSON array.
pub fn parse_binary_to_json(input: &[u8], options: &ParseOptions) -> Result<String> {
    let parser = Parser::new(options.clone())?;
    let records = parser.parse_binary_to_vec(input)?;
    Ok(serde_json::to_string(&records)?)
}

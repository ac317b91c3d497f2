use std::sync::LazyLock;

use regex::Regex;

static CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//[^/@]*@").expect("credential pattern must compile"));

/// Hides the user info segment of a connection string, `//user:pass@` becomes `//***:***@`.
pub fn mask_credentials(uri: &str) -> String {
    CREDENTIALS.replace(uri, "//***:***@").into_owned()
}

pub fn normalize(input: Option<&str>) -> String {
    input.map(str::trim).unwrap_or_default().to_string()
}

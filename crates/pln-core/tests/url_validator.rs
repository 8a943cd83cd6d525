use pln_core::url_validator::UrlValidator;

const BLOCKED: [&str; 2] = ["unavailable-domain.net", "nono.com"];

#[test]
fn accepts_public_http_urls() {
    let validator = UrlValidator::default();
    for url in [
        "https://sfu.ca",
        "http://sfu.ca",
        "http://sfu.ca/test/file.htm",
        "https://google.com:443",
        "http://unavailable-domain.net",
        "http://nono.com",
    ] {
        assert!(validator.is_valid(url), "{url} should be accepted");
    }
}

#[test]
fn rejects_local_addresses_and_other_schemes() {
    let validator = UrlValidator::default();
    for url in [
        "http://localhost",
        "https://localhost",
        "http://top-level-domain",
        "http://127.0.0.1",
        "http://255.255.255.255",
        "ftp://ftp.test",
        "invalid",
        "http://[::1]/IPv6",
    ] {
        assert!(!validator.is_valid(url), "{url} should be rejected");
    }
}

#[test]
fn rejects_blocked_hosts() {
    let validator = UrlValidator::new(BLOCKED);
    assert!(!validator.is_valid("http://unavailable-domain.net"));
    assert!(!validator.is_valid("http://NONO.com"));
    assert!(validator.is_valid("https://sfu.ca"));
}

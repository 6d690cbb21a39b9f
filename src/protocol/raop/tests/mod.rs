
pub(crate) const TEST_KEY_PEM: &str =
    include_str!("../../../../tests/fixtures/raop_test_key.pem");

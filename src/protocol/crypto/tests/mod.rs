mod rsa;

pub(crate) const TEST_KEY_PEM: &str =
    include_str!("../../../../tests/fixtures/raop_test_key.pem");

/// AES key `00 01 .. 0f` wrapped with RSA-OAEP-SHA1 under the test key
pub(crate) const WRAPPED_AES_KEY: &str = "DVjmSxdTl7eIXCgaw7qNdu4S0kbUpBGOe5dDAXqpP1nWtINIniq4hSz8oA5nc67mHDeI4+3o7pDhCvoQk6U8QxAndCsXCRL+uo3arXYDJdo5Wd1uO9ORTmjKX5SXt95aj20Zl6aR05OEZePfuIJfNF5rhPDFbVm0ljhlE4DlLRg";

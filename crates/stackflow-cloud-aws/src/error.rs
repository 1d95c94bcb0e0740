//! AWS CLI error types and classification

use regex::Regex;
use stackflow_cloud::CloudError;
use std::sync::LazyLock;
use thiserror::Error;

pub const AWS_CLI_INSTALL_HINT: &str =
    "https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html";

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("aws CLI not found. Please install: {AWS_CLI_INSTALL_HINT}")]
    CliNotFound,

    /// The service rejected the call (`An error occurred (<code>) when calling ...`)
    #[error("{operation} failed ({code}): {message}")]
    Service {
        code: String,
        operation: String,
        message: String,
    },

    #[error("Waiter {waiter} failed: {message}")]
    WaiterFailed { waiter: String, message: String },

    #[error("Waiter {0} gave up waiting")]
    WaiterTimeout(String),

    #[error("aws command failed: {0}")]
    CommandFailed(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AwsError>;

impl AwsError {
    /// Service error code, if the service answered at all
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.code().is_some_and(|c| codes.contains(&c))
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            AwsError::Service {
                code,
                operation,
                message,
            } => classify_service_error(code, operation, message.clone()).is_not_found(),
            AwsError::WaiterFailed { message, .. } => message.contains("does not exist"),
            _ => false,
        }
    }
}

/// Codes meaning the addressed object does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "404",
    "NoSuchBucket",
    "NoSuchKey",
    "NotFoundException",
    "ResourceNotFoundException",
    "TableNotFoundException",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "AlreadyExistsException",
    "BucketAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "TableAlreadyExistsException",
];

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

/// Codes S3 returns when an optional bucket configuration was never set
pub const CONFIG_MISSING_CODES: &[&str] = &[
    "NoSuchCORSConfiguration",
    "NoSuchLifecycleConfiguration",
    "ServerSideEncryptionConfigurationNotFoundError",
];

static SERVICE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)An error occurred \(([^)]+)\) when calling the (\w+) operation(?: \([^)]*\))?: (.*)",
    )
    .expect("valid service error regex")
});

static WAITER_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Waiter (\w+) failed: (.*)").expect("valid waiter regex"));

static BUSY_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+_IN_PROGRESS) state").expect("valid status regex"));

static STACK_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ss]tack[:\s]+\[?([\w:/\-]+)\]?").expect("valid stack regex"));

/// Turn the stderr of a failed `aws` invocation into a typed error
pub fn parse_cli_error(stderr: &str) -> AwsError {
    let stderr = stderr.trim();

    if let Some(caps) = SERVICE_ERROR.captures(stderr) {
        return AwsError::Service {
            code: caps[1].to_string(),
            operation: caps[2].to_string(),
            message: caps[3].trim().to_string(),
        };
    }

    if let Some(caps) = WAITER_ERROR.captures(stderr) {
        let message = caps[2].trim().to_string();
        if message.contains("Max attempts exceeded") {
            return AwsError::WaiterTimeout(caps[1].to_string());
        }
        return AwsError::WaiterFailed {
            waiter: caps[1].to_string(),
            message,
        };
    }

    AwsError::CommandFailed(stderr.to_string())
}

impl From<AwsError> for CloudError {
    fn from(error: AwsError) -> Self {
        match error {
            AwsError::CliNotFound => CloudError::ToolNotFound {
                tool: "aws".to_string(),
                install_hint: AWS_CLI_INSTALL_HINT.to_string(),
            },
            AwsError::Service {
                code,
                operation,
                message,
            } => classify_service_error(&code, &operation, message),
            AwsError::WaiterFailed { waiter, message } => {
                if message.contains("does not exist") {
                    CloudError::ResourceNotFound(message)
                } else {
                    CloudError::ApiError(format!("{}: {}", waiter, message))
                }
            }
            AwsError::WaiterTimeout(waiter) => {
                CloudError::Timeout(format!("{} did not reach its terminal state", waiter))
            }
            AwsError::CommandFailed(message) => CloudError::CommandFailed(message),
            AwsError::JsonError(e) => CloudError::Json(e),
            AwsError::IoError(e) => CloudError::Io(e),
        }
    }
}

fn classify_service_error(code: &str, operation: &str, message: String) -> CloudError {
    match code {
        c if NOT_FOUND_CODES.contains(&c) => CloudError::ResourceNotFound(message),
        c if ALREADY_EXISTS_CODES.contains(&c) => CloudError::ResourceAlreadyExists(message),
        c if AUTH_CODES.contains(&c) => CloudError::AuthenticationFailed(message),
        // CloudFormation reports most conditions as a ValidationError
        "ValidationError" if message.contains("does not exist") => {
            CloudError::ResourceNotFound(message)
        }
        "ValidationError" if message.contains("No updates are to be performed") => {
            CloudError::NoChanges(message)
        }
        "ValidationError" if BUSY_STATUS.is_match(&message) => {
            let status = BUSY_STATUS
                .captures(&message)
                .map(|caps| caps[1].to_string())
                .unwrap_or_default();
            let stack = STACK_REF
                .captures(&message)
                .map(|caps| caps[1].to_string())
                .unwrap_or_else(|| "stack".to_string());
            CloudError::StackBusy { stack, status }
        }
        "KMSInvalidStateException" if message.contains("pending deletion") => {
            CloudError::ResourceNotFound(message)
        }
        "ValidationException" | "InvalidParameterValue" | "InvalidParameterValueException" => {
            CloudError::InvalidConfig(format!("{}: {}", operation, message))
        }
        _ => CloudError::ApiError(format!("{} ({}): {}", operation, code, message)),
    }
}

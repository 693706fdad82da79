use std::fmt;

#[derive(Debug)]
pub struct Error {
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Self::msg(format!("walkdir error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal status of one pipeline invocation. The numeric value doubles as
/// the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    OutputFolderNotExist,
    BuildFailed,
    MergeLibsFailed,
    CopyOutputFailed,
    BackupFailed,
    WrapperBuildFailed,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == ErrorCode::NoError
    }

    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::OutputFolderNotExist => 10,
            ErrorCode::BuildFailed => 11,
            ErrorCode::MergeLibsFailed => 12,
            ErrorCode::CopyOutputFailed => 13,
            ErrorCode::BackupFailed => 14,
            ErrorCode::WrapperBuildFailed => 15,
        }
    }

    pub fn from_exit_code(code: u8) -> Option<Self> {
        [
            ErrorCode::NoError,
            ErrorCode::OutputFolderNotExist,
            ErrorCode::BuildFailed,
            ErrorCode::MergeLibsFailed,
            ErrorCode::CopyOutputFailed,
            ErrorCode::BackupFailed,
            ErrorCode::WrapperBuildFailed,
        ]
        .into_iter()
        .find(|c| c.exit_code() == code)
    }

    pub fn describe(self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::OutputFolderNotExist => {
                "output folder does not exist; run the prepare step first"
            }
            ErrorCode::BuildFailed => "building target libraries failed",
            ErrorCode::MergeLibsFailed => "merging libraries failed",
            ErrorCode::CopyOutputFailed => "copying built libraries to the output folder failed",
            ErrorCode::BackupFailed => "backing up built libraries failed",
            ErrorCode::WrapperBuildFailed => "building wrapper projects failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_round_trip_and_zero_is_success() {
        assert_eq!(ErrorCode::from_exit_code(0), Some(ErrorCode::NoError));
        assert_eq!(ErrorCode::from_exit_code(12), Some(ErrorCode::MergeLibsFailed));
        assert_eq!(ErrorCode::from_exit_code(1), None);
        assert!(ErrorCode::NoError.is_success());
        assert!(!ErrorCode::OutputFolderNotExist.is_success());
    }
}

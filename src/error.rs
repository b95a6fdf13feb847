use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("failed to open the content store")]
    Store,
    #[display("failed to build {_0}")]
    Build(#[error(not(source))] String),
    #[display("failed to run {_0}")]
    Run(#[error(not(source))] String),
    #[display("failed to resolve {_0}")]
    Binaries(#[error(not(source))] String),
    #[display("failed to write {_0}")]
    Output(#[error(not(source))] String),
}

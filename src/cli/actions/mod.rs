use anyhow::Result;

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Run the selected action to completion.
    ///
    /// # Errors
    /// Returns whatever error the action itself reports.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}

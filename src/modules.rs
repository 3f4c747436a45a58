//! The module stack doing the actual resolution.
//!
//! The context itself knows nothing about how a question turns into an
//! answer. That is the job of a [`ModuleStack`], typically an iterator
//! followed by a validator, which workers call for every query that can’t
//! be answered from local data.

use crate::answer::Answer;
use crate::arena::Arena;
use crate::config::Config;
use crate::error::Error;
use crate::question::Question;

//------------ ModuleStack ---------------------------------------------------

/// A pipeline resolving and validating questions.
///
/// A module stack is shared by all workers of a context and must cope with
/// being called from several threads at once. In forked mode, the worker
/// process uses the copy it got at fork time.
pub trait ModuleStack: Send + Sync {
    /// Prepares the modules for use.
    ///
    /// Called once while the context is finalized and before any worker
    /// starts. An error fails the finalization which may then be retried.
    fn init(&self, config: &Config) -> Result<(), Error> {
        let _ = config;
        Ok(())
    }

    /// Resolves a question.
    ///
    /// The arena belongs to the calling worker for the duration of the
    /// call. Failure to resolve should be reported as
    /// [`Error::ServFail`]; it is delivered to the query’s owner.
    fn resolve(
        &self,
        question: &Question,
        arena: &mut Arena,
    ) -> Result<Answer, Error>;

    /// Releases whatever `init` set up.
    ///
    /// Called when the context is torn down after all workers have ended.
    fn deinit(&self) {}
}

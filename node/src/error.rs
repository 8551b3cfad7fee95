// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use palaver_data::conversation::SendBlockReason;
use thiserror::Error;

use crate::clients::UpstreamError;

/// Failure taxonomy of every core operation. The HTTP layer maps each
/// variant to a status code; the cores themselves stay transport-neutral.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input out of range or missing. User-visible message.
    #[error("{0}")]
    Validation(String),

    /// Caller lacks the role or membership the operation requires.
    #[error("{message}")]
    Forbidden {
        code: &'static str,
        message: String,
    },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// Unique-constraint violation.
    #[error("{0}")]
    Conflict(String),

    /// The entity exists but its lifecycle state forbids the operation.
    #[error("{0}")]
    ForbiddenState(String),

    /// A collaborator call failed and the operation cannot proceed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Money moved but a dependent write failed. Logged for manual
    /// reconciliation, never retried in-request.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Persistence-layer failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::ForbiddenState(msg.into())
    }

    pub fn forbidden(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: msg.into(),
        }
    }

    /// Recovers a typed core error that crossed the anyhow transaction
    /// seam of `DB::update`.
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast::<CoreError>() {
            Ok(core) => core,
            Err(other) => CoreError::Internal(other),
        }
    }

    /// A denied send, carrying the machine code clients branch on.
    pub fn gate(reason: SendBlockReason) -> Self {
        let message = match reason {
            SendBlockReason::ConversationReported => {
                "this conversation has been reported".to_owned()
            }
            SendBlockReason::ConversationBlocked => {
                "this conversation is blocked".to_owned()
            }
            SendBlockReason::MessageLimitReached => {
                "message limit reached until the recipient accepts".to_owned()
            }
            SendBlockReason::NotParticipant => {
                "you are not a participant of this conversation".to_owned()
            }
        };
        Self::Forbidden {
            code: reason.code(),
            message,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_errors_carry_machine_codes() {
        match CoreError::gate(SendBlockReason::MessageLimitReached) {
            CoreError::Forbidden { code, .. } => {
                assert_eq!(code, "MESSAGE_LIMIT_REACHED")
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }
}

//! Newline-delimited JSON messages exchanged between coordinator and worker.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chpo_types::{Configuration, DispatchError, HpoResult};

/// A unit of work for a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: Uuid,
    /// Opaque label of the configuration, used only for logging.
    pub config_id: String,
    pub configuration: Configuration,
    pub budget: f64,
}

/// How a job ended on the worker. Non-finite losses travel as `null` and
/// are read back as infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    Ok { loss: Option<f64> },
    Err { message: String },
}

impl JobOutcome {
    pub fn from_result(result: HpoResult<f64>) -> Self {
        match result {
            Ok(loss) => Self::Ok {
                loss: loss.is_finite().then_some(loss),
            },
            Err(e) => Self::Err {
                message: e.to_string(),
            },
        }
    }

    pub fn into_result(self) -> Result<f64, String> {
        match self {
            Self::Ok { loss } => Ok(loss.unwrap_or(f64::INFINITY)),
            Self::Err { message } => Err(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    Register { worker_id: String, run_id: String },
    Result { job_id: Uuid, outcome: JobOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorMessage {
    Job(JobDescriptor),
    Shutdown,
}

/// Serialize a message as one line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> HpoResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> HpoResult<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| {
        DispatchError::Protocol {
            message: format!("malformed message {line:?}: {e}"),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chpo_types::{HpoError, ParameterValue};

    #[test]
    fn job_is_a_single_line() {
        let mut configuration = Configuration::new();
        configuration.insert("lr".into(), ParameterValue::Float(0.01));
        configuration.insert("layers".into(), ParameterValue::Int(3));
        let message = CoordinatorMessage::Job(JobDescriptor {
            job_id: Uuid::new_v4(),
            config_id: "(0, 4)".into(),
            configuration,
            budget: 3.0,
        });

        let line = encode_line(&message).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line::<CoordinatorMessage>(&line).unwrap(), message);
    }

    #[test]
    fn register_wire_format() {
        let line = encode_line(&WorkerMessage::Register {
            worker_id: "w0".into(),
            run_id: "run".into(),
        })
        .unwrap();
        assert_eq!(
            line,
            "{\"Register\":{\"worker_id\":\"w0\",\"run_id\":\"run\"}}\n"
        );
        assert_eq!(encode_line(&CoordinatorMessage::Shutdown).unwrap(), "\"Shutdown\"\n");
    }

    #[test]
    fn non_finite_loss_survives_as_infinity() {
        let outcome = JobOutcome::from_result(Ok(f64::NAN));
        let message = WorkerMessage::Result {
            job_id: Uuid::new_v4(),
            outcome,
        };
        let back: WorkerMessage = decode_line(&encode_line(&message).unwrap()).unwrap();
        match back {
            WorkerMessage::Result { outcome, .. } => {
                assert_eq!(outcome.into_result(), Ok(f64::INFINITY));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn objective_errors_carry_their_message() {
        let outcome = JobOutcome::from_result(Err(HpoError::objective("diverged")));
        let message = outcome.into_result().unwrap_err();
        assert!(message.contains("diverged"));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let err = decode_line::<WorkerMessage>("not json\n").unwrap_err();
        assert!(matches!(err, HpoError::Dispatch(DispatchError::Protocol { .. })));
    }
}

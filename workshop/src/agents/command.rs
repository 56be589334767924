//! Collaborators backed by external commands.
//!
//! Each call spawns the configured command, writes the request as JSON on
//! stdin, and reads a single JSON document from stdout. The response is
//! validated against the role's JSON Schema before it is deserialized, so a
//! malformed reply is reported as a collaborator failure with the schema
//! errors attached.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::agents::{
    Agents, AutoApprove, Critic, Critique, CritiqueRequest, GenerateRequest, Generator,
    PlanRequest, Planner, ReviewDecision, Reviewer,
};
use crate::core::types::{ArtifactRef, CommissionId, PlanArtifact};
use crate::io::config::AgentsConfig;
use crate::io::process::run_command_with_timeout;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");
const ARTIFACT_SCHEMA: &str = include_str!("../../schemas/artifact.schema.json");
const CRITIQUE_SCHEMA: &str = include_str!("../../schemas/critique.schema.json");

/// Bytes of stderr quoted in failure messages.
const STDERR_TAIL_BYTES: usize = 2_000;

/// How to launch one collaborator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program followed by its arguments.
    pub program: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// A JSON-in, JSON-out command bound to one response schema.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    role: &'static str,
    spec: CommandSpec,
    schema: &'static str,
}

impl CommandAgent {
    fn new(role: &'static str, spec: CommandSpec, schema: &'static str) -> Result<Self> {
        if spec.program.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("{role} command must be a non-empty array"));
        }
        Ok(Self { role, spec, schema })
    }

    /// Run the command once and parse its validated reply.
    #[instrument(skip_all, fields(role = self.role, program = %self.spec.program[0]))]
    pub fn invoke<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let input = serde_json::to_vec(request)
            .with_context(|| format!("serialize {} request", self.role))?;

        let mut cmd = Command::new(&self.spec.program[0]);
        cmd.args(&self.spec.program[1..]);
        let output = run_command_with_timeout(
            cmd,
            Some(&input),
            self.spec.timeout,
            self.spec.output_limit_bytes,
        )
        .with_context(|| format!("run {} command", self.role))?;

        if output.timed_out {
            return Err(anyhow!(
                "{} command timed out after {}s",
                self.role,
                self.spec.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "{} command exited with {:?}: {}",
                self.role,
                output.status.code(),
                output.stderr_tail(STDERR_TAIL_BYTES)
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "{} response exceeded {} bytes",
                self.role,
                self.spec.output_limit_bytes
            ));
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parse {} response as JSON", self.role))?;
        self.validate_schema(&value)?;
        debug!("response passed schema validation");
        serde_json::from_value(value).with_context(|| format!("deserialize {} response", self.role))
    }

    fn validate_schema(&self, value: &Value) -> Result<()> {
        let schema: Value = serde_json::from_str(self.schema)
            .with_context(|| format!("parse {} schema", self.role))?;
        let compiled =
            validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
        if !compiled.is_valid(value) {
            let messages = compiled
                .iter_errors(value)
                .map(|err| err.to_string())
                .collect::<Vec<_>>();
            warn!(role = self.role, errors = messages.len(), "response rejected by schema");
            return Err(anyhow!(
                "{} response schema validation failed: {}",
                self.role,
                messages.join("; ")
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandPlanner(CommandAgent);

impl CommandPlanner {
    pub fn new(spec: CommandSpec) -> Result<Self> {
        CommandAgent::new("planner", spec, PLAN_SCHEMA).map(Self)
    }
}

impl Planner for CommandPlanner {
    fn propose_plan(&self, request: &PlanRequest) -> Result<PlanArtifact> {
        self.0.invoke(request)
    }
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    commission_id: &'a CommissionId,
    plan: &'a PlanArtifact,
}

/// Review gate: either a command or automatic approval.
#[derive(Debug, Clone)]
pub enum ReviewGate {
    AutoApprove,
    Command(CommandAgent),
}

impl ReviewGate {
    /// An empty command disables the gate.
    pub fn new(program: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if program.is_empty() {
            return Ok(Self::AutoApprove);
        }
        let spec = CommandSpec {
            program,
            timeout,
            output_limit_bytes,
        };
        CommandAgent::new("reviewer", spec, REVIEW_SCHEMA).map(Self::Command)
    }
}

impl Reviewer for ReviewGate {
    fn review(&self, commission_id: &CommissionId, plan: &PlanArtifact) -> Result<ReviewDecision> {
        match self {
            Self::AutoApprove => AutoApprove.review(commission_id, plan),
            Self::Command(agent) => {
                let decision: ReviewDecision = agent.invoke(&ReviewRequest {
                    commission_id,
                    plan,
                })?;
                decision.validate()?;
                Ok(decision)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedArtifact {
    artifact: ArtifactRef,
}

#[derive(Debug, Clone)]
pub struct CommandGenerator(CommandAgent);

impl CommandGenerator {
    pub fn new(spec: CommandSpec) -> Result<Self> {
        CommandAgent::new("generator", spec, ARTIFACT_SCHEMA).map(Self)
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<ArtifactRef> {
        let reply: GeneratedArtifact = self.0.invoke(request)?;
        Ok(reply.artifact)
    }
}

#[derive(Debug, Clone)]
pub struct CommandCritic(CommandAgent);

impl CommandCritic {
    pub fn new(spec: CommandSpec) -> Result<Self> {
        CommandAgent::new("critic", spec, CRITIQUE_SCHEMA).map(Self)
    }
}

impl Critic for CommandCritic {
    fn critique(&self, request: &CritiqueRequest) -> Result<Critique> {
        self.0.invoke(request)
    }
}

pub type CommandAgents = Agents<CommandPlanner, ReviewGate, CommandGenerator, CommandCritic>;

/// Build the four command collaborators from `[agents]`.
pub fn agents_from_config(config: &AgentsConfig) -> Result<CommandAgents> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let spec = |program: &[String]| CommandSpec {
        program: program.to_vec(),
        timeout,
        output_limit_bytes: config.output_limit_bytes,
    };
    Ok(Agents {
        planner: CommandPlanner::new(spec(&config.planner))?,
        reviewer: ReviewGate::new(
            config.reviewer.clone(),
            timeout,
            config.output_limit_bytes,
        )?,
        generator: CommandGenerator::new(spec(&config.generator))?,
        critic: CommandCritic::new(spec(&config.critic))?,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::types::Flaw;

    fn sh_spec(script: &str) -> CommandSpec {
        CommandSpec {
            program: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    fn id() -> CommissionId {
        CommissionId::parse("commission-test").expect("id")
    }

    fn plan() -> PlanArtifact {
        PlanArtifact {
            summary: "build a parser".to_string(),
            tasks: vec!["lexer".to_string()],
        }
    }

    #[test]
    fn planner_receives_request_on_stdin() {
        // Echo the prompt back as the plan summary.
        let planner = CommandPlanner::new(sh_spec(
            r#"prompt=$(sed -n 's/.*"prompt":"\([^"]*\)".*/\1/p'); printf '{"summary":"%s","tasks":["a","b"]}' "$prompt""#,
        ))
        .expect("planner");
        let plan = planner
            .propose_plan(&PlanRequest {
                commission_id: id(),
                prompt: "write a lexer".to_string(),
                feedback: Vec::new(),
            })
            .expect("plan");
        assert_eq!(plan.summary, "write a lexer");
        assert_eq!(plan.tasks, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn schema_violation_is_a_failure() {
        let critic = CommandCritic::new(sh_spec(r#"cat >/dev/null; printf '{"overall":"high"}'"#))
            .expect("critic");
        let err = critic
            .critique(&CritiqueRequest {
                commission_id: id(),
                artifact: ArtifactRef("out/v0".to_string()),
                plan: plan(),
            })
            .expect_err("schema rejects string score");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn critic_reply_parses_score_and_flaws() {
        let critic = CommandCritic::new(sh_spec(
            r#"cat >/dev/null; printf '{"overall":0.75,"flaws":[{"severity":"critical","description":"crash"}]}'"#,
        ))
        .expect("critic");
        let critique = critic
            .critique(&CritiqueRequest {
                commission_id: id(),
                artifact: ArtifactRef("out/v0".to_string()),
                plan: plan(),
            })
            .expect("critique");
        assert_eq!(critique.score.overall, 0.75);
        assert_eq!(
            critique.flaws,
            vec![Flaw {
                severity: crate::core::types::FlawSeverity::Critical,
                description: "crash".to_string(),
            }]
        );
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let generator =
            CommandGenerator::new(sh_spec("cat >/dev/null; echo 'model unavailable' >&2; exit 2"))
                .expect("generator");
        let err = generator
            .generate(&GenerateRequest {
                commission_id: id(),
                plan: plan(),
                prior_artifact: None,
                flaws: Vec::new(),
                signal: None,
            })
            .expect_err("exit 2");
        let message = err.to_string();
        assert!(message.contains("exited with Some(2)"));
        assert!(message.contains("model unavailable"));
    }

    #[test]
    fn timeout_is_a_failure() {
        let mut spec = sh_spec("exec sleep 5");
        spec.timeout = Duration::from_millis(100);
        let generator = CommandGenerator::new(spec).expect("generator");
        let err = generator
            .generate(&GenerateRequest {
                commission_id: id(),
                plan: plan(),
                prior_artifact: None,
                flaws: Vec::new(),
                signal: None,
            })
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn review_revision_without_focus_is_rejected() {
        let gate = ReviewGate::new(
            sh_spec(r#"cat >/dev/null; printf '{"decision":"revision_requested","rationale":"vague","focus_areas":[]}'"#)
                .program,
            Duration::from_secs(10),
            10_000,
        )
        .expect("gate");
        assert!(gate.review(&id(), &plan()).is_err());
    }

    #[test]
    fn empty_reviewer_command_auto_approves() {
        let gate = ReviewGate::new(Vec::new(), Duration::from_secs(1), 1).expect("gate");
        assert!(matches!(gate, ReviewGate::AutoApprove));
        assert_eq!(
            gate.review(&id(), &plan()).expect("review"),
            ReviewDecision::Approved
        );
    }

    #[test]
    fn empty_planner_command_is_rejected() {
        let spec = CommandSpec {
            program: Vec::new(),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1,
        };
        assert!(CommandPlanner::new(spec).is_err());
    }
}

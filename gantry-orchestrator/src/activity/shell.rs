//! Shell activities
//!
//! Runs the pipeline work through the docker and kubectl command line tools:
//! - Building and smoke testing images
//! - Tagging and pushing to the registry
//! - Rolling deployments out (and back) in the environment namespace
//! - Rendering approval notifications into the log

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::domain::activity::{
    ApprovalNotice, BuildRequest, DecisionNotice, DeployRequest, PublishRequest, RollbackReport,
    RollbackRequest, TestRequest,
};
use gantry_core::domain::deployment::DeploymentRecord;
use gantry_core::domain::phase::{Phase, PhaseResult};
use gantry_core::domain::pipeline::Environment;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::activity::{Activities, ActivityError};
use crate::config::Config;

/// Time given to a freshly started test container before tests hit it
const CONTAINER_SETTLE: Duration = Duration::from_secs(2);

/// Port the application listens on inside its container
const APP_PORT: &str = "8080";

/// Deployment annotation naming the image a rollout replaced
const PREVIOUS_IMAGE_ANNOTATION: &str = "gantry.dev/previous-image";

/// Current container image, then the recorded previous image, one per line
const RELEASE_JSONPATH: &str = "jsonpath={.spec.template.spec.containers[0].image}{\"\\n\"}{.metadata.annotations.gantry\\.dev/previous-image}";

/// Longest test output kept as the failure diagnostic
const MAX_DIAGNOSTIC_LEN: usize = 4096;

pub struct ShellActivities {
    config: Config,
}

impl ShellActivities {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs a command to completion, returning its output whatever the exit status
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ActivityError> {
        let command = describe(program, args);
        debug!(command = %command, "Running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| ActivityError::Spawn {
                command: command.clone(),
                source,
            })?;

        Ok(CommandOutput {
            command,
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs a command and fails on a non-zero exit status
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ActivityError> {
        let output = self.run(program, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(output.into_error())
        }
    }

    async fn run_tests(&self, container: &str, req: &TestRequest) -> Result<PhaseResult, ActivityError> {
        let started = Instant::now();

        let mapping = self.run_checked("docker", &["port", container, APP_PORT]).await?;
        let port = parse_mapped_port(&mapping.stdout).ok_or_else(|| {
            ActivityError::Failed(format!("unexpected port mapping '{}'", mapping.stdout.trim()))
        })?;

        tokio::time::sleep(CONTAINER_SETTLE).await;

        let command = self.config.test_command.clone();
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&req.build_context)
            .env("BASE_URL", format!("http://localhost:{}", port))
            .output()
            .await
            .map_err(|source| ActivityError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
        report.push_str(&String::from_utf8_lossy(&output.stderr));
        let elapsed = elapsed_ms(started);

        if output.status.success() {
            info!(duration_ms = elapsed, "Tests passed");
            Ok(PhaseResult::succeeded(Phase::Test, None, elapsed))
        } else {
            warn!(duration_ms = elapsed, status = %output.status, "Tests reported failures");
            Ok(PhaseResult::failed(Phase::Test, tail(&report, MAX_DIAGNOSTIC_LEN), elapsed))
        }
    }

    /// Release a rollout of `image` replaces; `None` before the first deploy
    async fn release_before(
        &self,
        target: &str,
        namespace: &str,
        image: &str,
    ) -> Result<Option<String>, ActivityError> {
        let lookup = self
            .run("kubectl", &["get", target, "-n", namespace, "-o", RELEASE_JSONPATH])
            .await?;
        if lookup.success {
            Ok(previous_release(&lookup.stdout, image))
        } else if lookup.stderr.contains("not found") {
            Ok(None)
        } else {
            Err(lookup.into_error())
        }
    }

    async fn ensure_service(&self, name: &str, namespace: &str) -> Result<(), ActivityError> {
        let existing = self
            .run("kubectl", &["get", "service", name, "-n", namespace])
            .await?;
        if existing.success {
            return Ok(());
        }

        info!(service = name, namespace, "Service not found, exposing deployment");
        let port = format!("--port={}", APP_PORT);
        self.run_checked(
            "kubectl",
            &[
                "expose",
                "deployment",
                name,
                &port,
                "--type=LoadBalancer",
                "-n",
                namespace,
            ],
        )
        .await?;
        Ok(())
    }

    /// Reachable URL of the service, falling back to its in-cluster address
    async fn service_url(&self, name: &str, namespace: &str, environment: Environment) -> String {
        let lookup = self
            .run(
                "kubectl",
                &[
                    "get",
                    "service",
                    name,
                    "-n",
                    namespace,
                    "-o",
                    "jsonpath={.status.loadBalancer.ingress[0].hostname}{.status.loadBalancer.ingress[0].ip}",
                ],
            )
            .await;

        match lookup {
            Ok(output) if output.success && !output.stdout.trim().is_empty() => {
                let scheme = match environment {
                    Environment::Production => "https",
                    Environment::Staging => "http",
                };
                format!("{}://{}", scheme, output.stdout.trim())
            }
            _ => {
                debug!(service = name, namespace, "No external address, using cluster DNS");
                format!("http://{}.{}.svc.cluster.local:{}", name, namespace, APP_PORT)
            }
        }
    }
}

#[async_trait]
impl Activities for ShellActivities {
    async fn build(&self, req: &BuildRequest) -> Result<PhaseResult, ActivityError> {
        let started = Instant::now();
        let image = format!("{}:{}", req.image_name, req.tag);
        let dockerfile = resolve_dockerfile(&req.build_context, &req.dockerfile);

        info!(image = %image, context = %req.build_context, dockerfile = %dockerfile, "Building image");

        self.run_checked(
            "docker",
            &["buildx", "build", "-t", &image, "-f", &dockerfile, &req.build_context],
        )
        .await?;

        let id = self.run_checked("docker", &["images", "-q", &image]).await?;
        let image_id = id.stdout.trim().to_string();

        info!(image_id = %image_id, "Image built");
        Ok(PhaseResult::succeeded(Phase::Build, Some(image_id), elapsed_ms(started)))
    }

    async fn test(&self, req: &TestRequest) -> Result<PhaseResult, ActivityError> {
        let image = format!("{}:{}", req.image_name, req.tag);
        let container = format!("test-{}-{}", req.tag, Utc::now().timestamp());

        info!(image = %image, container = %container, "Starting test container");
        self.run_checked(
            "docker",
            &["run", "-d", "--name", &container, "-p", APP_PORT, &image],
        )
        .await?;

        let result = self.run_tests(&container, req).await;

        match self.run("docker", &["rm", "-f", &container]).await {
            Ok(output) if output.success => debug!(container = %container, "Test container removed"),
            Ok(output) => warn!(container = %container, stderr = %output.stderr.trim(), "Failed to remove test container"),
            Err(e) => warn!(container = %container, error = %e, "Failed to remove test container"),
        }

        result
    }

    async fn publish(&self, req: &PublishRequest) -> Result<PhaseResult, ActivityError> {
        let started = Instant::now();
        let local = format!("{}:{}", req.image_name, req.tag);
        let registry = req.registry_url.trim_end_matches('/');

        if registry.is_empty() {
            info!(image = %local, "No registry configured, image stays local");
            return Ok(PhaseResult::succeeded(Phase::Publish, Some(local), elapsed_ms(started)));
        }

        let remote = format!("{}/{}", registry, local);
        info!(image = %remote, "Publishing image");

        self.run_checked("docker", &["tag", &local, &remote]).await?;
        let push = self.run_checked("docker", &["push", &remote]).await?;
        let digest = extract_digest(&push.stdout);

        info!(image = %remote, digest = %digest, "Image published");
        Ok(PhaseResult::succeeded(Phase::Publish, Some(digest), elapsed_ms(started)))
    }

    async fn deploy(&self, req: &DeployRequest) -> Result<DeploymentRecord, ActivityError> {
        let namespace = self.config.namespace(req.environment);
        let name = self.config.deployment_name.as_str();
        let target = format!("deployment/{}", name);
        let container_image = format!("{}={}", name, req.image);

        info!(image = %req.image, environment = %req.environment, namespace, "Deploying");

        // Recorded on the deployment first, so a retried rollout still knows it
        let previous = self.release_before(&target, namespace, &req.image).await?;
        if let Some(image) = &previous {
            let annotation = format!("{}={}", PREVIOUS_IMAGE_ANNOTATION, image);
            self.run_checked(
                "kubectl",
                &["annotate", &target, &annotation, "--overwrite", "-n", namespace],
            )
            .await?;
        }

        let update = self
            .run("kubectl", &["set", "image", &target, &container_image, "-n", namespace])
            .await?;
        if !update.success {
            if update.stderr.contains("not found") {
                info!(deployment = name, namespace, "Deployment not found, creating it");
                let image_arg = format!("--image={}", req.image);
                self.run_checked(
                    "kubectl",
                    &["create", "deployment", name, &image_arg, "-n", namespace],
                )
                .await?;
            } else {
                return Err(update.into_error());
            }
        }

        self.run_checked(
            "kubectl",
            &["rollout", "status", &target, "-n", namespace, "--timeout=120s"],
        )
        .await?;

        self.ensure_service(name, namespace).await?;
        let endpoint = self.service_url(name, namespace, req.environment).await;

        info!(endpoint = %endpoint, environment = %req.environment, previous = ?previous, "Deployment rolled out");
        Ok(DeploymentRecord {
            environment: req.environment,
            endpoint,
            success: true,
            deployed_at: Utc::now(),
            previous_image: previous,
        })
    }

    /// Puts the recorded previous image back
    ///
    /// Setting a known image is idempotent, so a retried rollback after a
    /// partial failure cannot step further back than the previous release.
    async fn rollback(&self, req: &RollbackRequest) -> Result<RollbackReport, ActivityError> {
        let namespace = self.config.namespace(req.environment);
        let name = self.config.deployment_name.as_str();
        let target = format!("deployment/{}", name);

        let Some(image) = req.restore_image.as_deref() else {
            return Err(ActivityError::Failed(format!(
                "no previous release recorded for {} in {}",
                target, namespace
            )));
        };

        warn!(environment = %req.environment, namespace, image, reason = %req.reason, "Rolling back");

        let container_image = format!("{}={}", name, image);
        self.run_checked("kubectl", &["set", "image", &target, &container_image, "-n", namespace])
            .await?;
        self.run_checked(
            "kubectl",
            &["rollout", "status", &target, "-n", namespace, "--timeout=120s"],
        )
        .await?;

        Ok(RollbackReport {
            success: true,
            message: format!("{} in {} restored to {}", target, namespace, image),
        })
    }

    async fn notify_approval_request(&self, notice: &ApprovalNotice) -> Result<(), ActivityError> {
        info!(
            pipeline_id = %notice.pipeline_id,
            image = %notice.image,
            staging_endpoint = %notice.staging_endpoint,
            "Production deployment awaiting approval\n{}",
            approval_banner(notice)
        );
        Ok(())
    }

    async fn notify_approval_decision(&self, notice: &DecisionNotice) -> Result<(), ActivityError> {
        info!(
            pipeline_id = %notice.pipeline_id,
            image = %notice.image,
            environment = %notice.environment,
            approved = notice.decision.approved,
            approver = %notice.decision.approver,
            reason = %notice.decision.reason,
            decided_at = %notice.decided_at,
            "Approval decision recorded"
        );
        Ok(())
    }
}

struct CommandOutput {
    command: String,
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn into_error(self) -> ActivityError {
        let output = if self.stderr.trim().is_empty() {
            self.stdout
        } else {
            self.stderr
        };
        ActivityError::CommandFailed {
            command: self.command,
            status: self.status,
            output: tail(output.trim(), MAX_DIAGNOSTIC_LEN),
        }
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Relative Dockerfile paths are taken relative to the build context
fn resolve_dockerfile(build_context: &str, dockerfile: &str) -> String {
    let path = Path::new(dockerfile);
    if path.is_absolute() {
        dockerfile.to_string()
    } else {
        Path::new(build_context).join(path).to_string_lossy().into_owned()
    }
}

/// Host port from `docker port` output such as `0.0.0.0:32768`
fn parse_mapped_port(output: &str) -> Option<&str> {
    let line = output.lines().next()?.trim();
    let port = line.rsplit(':').next()?;
    (!port.is_empty() && port.chars().all(|c| c.is_ascii_digit())).then_some(port)
}

/// Digest reported by `docker push`, or `unknown` when absent
fn extract_digest(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.contains("digest:"))
        .find_map(|line| {
            let (_, rest) = line.split_once("sha256:")?;
            let hash = rest.split_whitespace().next()?;
            Some(format!("sha256:{}", hash))
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Release to restore on rollback, from the `RELEASE_JSONPATH` lookup
///
/// A deployment already running `image` means this rollout was retried or
/// repeated; the annotation from the first attempt still names the release
/// before it.
fn previous_release(lookup: &str, image: &str) -> Option<String> {
    let mut lines = lookup.lines().map(str::trim);
    let current = lines.next().filter(|line| !line.is_empty());
    let annotated = lines.next().filter(|line| !line.is_empty());

    match current {
        Some(current) if current != image => Some(current.to_string()),
        _ => annotated.filter(|a| *a != image).map(str::to_string),
    }
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn approval_banner(notice: &ApprovalNotice) -> String {
    let id = notice.pipeline_id;
    [
        "==============================================================".to_string(),
        format!("  APPROVAL REQUIRED for {} deployment", notice.environment),
        format!("  Pipeline: {}", id),
        format!("  Image:    {}", notice.image),
        format!("  Staging:  {}", notice.staging_endpoint),
        String::new(),
        format!("  approve: gantry approve {} --approver <name>", id),
        format!("  reject:  gantry reject {} --approver <name> --reason <text>", id),
        format!("  status:  gantry pipeline status {}", id),
        "==============================================================".to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_extract_digest() {
        let output = "The push refers to repository [registry.local/demo-app]\n\
                      5f70bf18a086: Pushed\n\
                      v1.0.0: digest: sha256:4c1e9f0d2b size: 1570\n";
        assert_eq!(extract_digest(output), "sha256:4c1e9f0d2b");
        assert_eq!(extract_digest("5f70bf18a086: Pushed"), "unknown");
    }

    #[test]
    fn test_parse_mapped_port() {
        assert_eq!(parse_mapped_port("0.0.0.0:32768\n[::]:32768\n"), Some("32768"));
        assert_eq!(parse_mapped_port(""), None);
        assert_eq!(parse_mapped_port("no mapping"), None);
    }

    #[test]
    fn test_resolve_dockerfile() {
        assert_eq!(
            resolve_dockerfile("./sample-app", "Dockerfile"),
            "./sample-app/Dockerfile"
        );
        assert_eq!(resolve_dockerfile("./sample-app", "/tmp/Dockerfile"), "/tmp/Dockerfile");
    }

    #[test]
    fn test_previous_release() {
        let target = "registry.local/demo-app:v2.0.0";
        // First rollout over an older release
        assert_eq!(
            previous_release("registry.local/demo-app:v1.0.0\n", target),
            Some("registry.local/demo-app:v1.0.0".to_string())
        );
        // Retried rollout: the deployment already runs the target
        assert_eq!(
            previous_release(
                "registry.local/demo-app:v2.0.0\nregistry.local/demo-app:v1.0.0",
                target
            ),
            Some("registry.local/demo-app:v1.0.0".to_string())
        );
        assert_eq!(previous_release("registry.local/demo-app:v2.0.0\n", target), None);
        assert_eq!(previous_release("", target), None);
    }

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        // never splits a multi-byte character
        assert_eq!(tail("aéb", 2), "b");
    }

    #[test]
    fn test_approval_banner_lists_commands() {
        let notice = ApprovalNotice {
            pipeline_id: Uuid::nil(),
            image: "registry.local/demo-app:v1.0.0".to_string(),
            environment: Environment::Production,
            staging_endpoint: "http://staging.local".to_string(),
        };
        let banner = approval_banner(&notice);
        assert!(banner.contains("gantry approve 00000000-0000-0000-0000-000000000000"));
        assert!(banner.contains("gantry reject"));
        assert!(banner.contains("http://staging.local"));
    }
}

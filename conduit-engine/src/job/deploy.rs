//! Deploy configurator (Kubernetes and Helm projects)
//!
//! Targets are either selected by the user at submission time or derived
//! from an earlier build, distribute or deploy job of the same workflow.
//! Expansion produces one task per service, keyed `<job>.<service>`.

use async_trait::async_trait;
use conduit_core::domain::environment::{
    CreateEnvType, DeployType, Environment, Project, RenderVariableKV, ServiceTemplate,
    extract_image_name,
};
use conduit_core::domain::job_spec::{
    BuildJobSpec, DeployContent, DeployEnvInformation, DeployJobSpec, DeployModuleInfo,
    DeployServiceInfo, DeploySource, DeployVariableConfig, DistributeImageJobSpec,
    FIXED_VALUE_MARK, ServiceWithModuleAndImage, strip_fixed_mark,
};
use conduit_core::domain::job_type::JobType;
use conduit_core::domain::task::{JobTask, WorkflowServiceModule};
use conduit_core::domain::task_spec::{
    DeployServiceModule, DeployTaskSpec, HelmDeployTaskSpec, JobTaskSpec,
};
use conduit_core::domain::workflow::{Job, Workflow};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use super::{JobConfigurator, JobContext, SpecJob, ensure_quoted_earlier, fanout_key, find_quoted_job, minutes_to_secs};
use crate::config::License;
use crate::context::output_key;
use crate::error::{EngineError, Result};
use crate::render::{IMAGE_PLACEHOLDER, render_service};
use crate::values::merge_yaml;

const DEFAULT_RELEASE_NAMING: &str = "$Namespace$-$Service$";

/// Output every deploy task publishes under its job name
pub const ENV_NAME_OUTPUT: &str = "envName";

pub struct DeployJob {
    inner: SpecJob<DeployJobSpec>,
}

impl DeployJob {
    pub fn new(job: &Job) -> Result<Self> {
        let mut inner = SpecJob::<DeployJobSpec>::decode(job)?;
        set_default_contents(&mut inner.spec);
        Ok(Self { inner })
    }

    pub fn spec(&self) -> &DeployJobSpec {
        &self.inner.spec
    }

    /// The job the user quoted directly
    fn quoted_job(&self) -> &str {
        let spec = &self.inner.spec;
        if spec.origin_job_name.is_empty() {
            &spec.job_name
        } else {
            &spec.origin_job_name
        }
    }

    /// Services to deploy, with from-job modules resolved
    fn resolve_services(&self, workflow: &Workflow) -> Result<Vec<DeployServiceInfo>> {
        let spec = &self.inner.spec;
        if spec.source != DeploySource::FromJob {
            return Ok(spec.services.clone());
        }

        let origin = origin_job_name(workflow, self.quoted_job());
        let produced = quoted_services(workflow, self.inner.name(), &origin)?;
        let configured: HashMap<&str, &DeployServiceInfo> = spec
            .services
            .iter()
            .map(|s| (s.service_name.as_str(), s))
            .collect();

        Ok(produced
            .into_iter()
            .filter_map(|svc| {
                configured.get(svc.service_name.as_str()).map(|configured| DeployServiceInfo {
                    modules: svc.service_modules,
                    ..(*configured).clone()
                })
            })
            .collect())
    }

    async fn k8s_tasks(
        &self,
        ctx: &JobContext,
        project: &Project,
        env: &Environment,
        services: &[DeployServiceInfo],
    ) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let timeout = minutes_to_secs(project.timeout);
        let system_env = project.create_env_type == CreateEnvType::System;
        let mut tasks = Vec::new();

        for service in services {
            if project.is_host_project() && env.service(&service.service_name).is_none() {
                return Err(EngineError::validation(format!(
                    "service {} is not deployed in environment {}",
                    service.service_name, env.env_name
                )));
            }

            let mut task_spec = DeployTaskSpec {
                project: project.name.clone(),
                env: env.env_name.clone(),
                service_name: service.service_name.clone(),
                production: spec.production,
                skip_check_run_status: spec.skip_check_run_status,
                cluster_id: env.cluster_id.clone(),
                namespace: env.namespace.clone(),
                system_env,
                deploy_contents: spec.deploy_contents.clone(),
                service_and_images: service.modules.iter().map(DeployServiceModule::from).collect(),
                timeout,
                ..Default::default()
            };

            if !project.is_host_project() {
                task_spec.update_config = service.update_config;
                task_spec.variable_configs = service.variable_configs.clone();
                task_spec.variable_kvs = deployable_kvs(service, env);
                if spec.only_deploys_image() {
                    task_spec.variable_configs.clear();
                    task_spec.variable_kvs.clear();
                }
            }

            if system_env {
                task_spec.yaml = self.render_manifest(ctx, project, env, &task_spec).await?;
            }

            for module in &task_spec.service_and_images {
                debug!(
                    "Deploy {} expands {}/{} with image {}",
                    self.inner.name(),
                    service.service_name,
                    module.service_module,
                    module.image
                );
            }

            let mut task = self.inner.task(
                format!("{}-{}", service.service_name, self.inner.name()),
                fanout_key(self.inner.name(), &service.service_name),
                JobTaskSpec::Deploy(task_spec),
            );
            decorate(&mut task, env, service);
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Renders the full manifest for a platform-created environment
    ///
    /// Current environment values are the base. Job variables apply only when
    /// vars are deployed and job images only when images are deployed.
    async fn render_manifest(
        &self,
        ctx: &JobContext,
        project: &Project,
        env: &Environment,
        task_spec: &DeployTaskSpec,
    ) -> Result<String> {
        let spec = &self.inner.spec;
        let env_service = env.service(&task_spec.service_name);
        let revision = if spec.deploys(DeployContent::Config) && task_spec.update_config {
            None
        } else {
            env_service.map(|s| s.revision).filter(|r| *r > 0)
        };
        let template = ctx
            .catalog
            .find_service(&project.name, &task_spec.service_name, revision, spec.production)
            .await?;

        let mut kvs: Vec<RenderVariableKV> = env_service
            .map(|s| s.variable_kvs.clone())
            .unwrap_or_default();
        if spec.deploys(DeployContent::Vars) {
            for kv in &task_spec.variable_kvs {
                match kvs.iter_mut().find(|existing| existing.key == kv.key) {
                    Some(existing) => *existing = kv.clone(),
                    None => kvs.push(kv.clone()),
                }
            }
        }

        let mut images: BTreeMap<String, String> = env_service
            .map(|s| {
                s.containers
                    .iter()
                    .map(|c| (c.name.clone(), c.image.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if spec.deploys(DeployContent::Image) {
            for module in &task_spec.service_and_images {
                let image = if spec.source == DeploySource::FromJob {
                    IMAGE_PLACEHOLDER.to_string()
                } else {
                    module.image.clone()
                };
                images.insert(module.service_module.clone(), image);
            }
        }

        render_service(&template, Some(&kvs), Some(&images))
    }

    async fn helm_tasks(
        &self,
        ctx: &JobContext,
        project: &Project,
        env: &Environment,
        services: &[DeployServiceInfo],
    ) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let timeout = minutes_to_secs(project.timeout);
        let mut tasks = Vec::new();

        for service in services {
            let env_service = env.service(&service.service_name);
            let revision = env_service.map(|s| s.revision).filter(|r| *r > 0);
            let template = ctx
                .catalog
                .find_service(&project.name, &service.service_name, revision, spec.production)
                .await?;

            let release_name = match env_service {
                Some(s) if !s.release_name.is_empty() => s.release_name.clone(),
                _ => release_name(&template, &project.name, env),
            };

            let mut task_spec = HelmDeployTaskSpec {
                project: project.name.clone(),
                env: env.env_name.clone(),
                service_name: service.service_name.clone(),
                service_revision: template.revision,
                release_name,
                cluster_id: env.cluster_id.clone(),
                namespace: env.namespace.clone(),
                production: spec.production,
                skip_check_run_status: spec.skip_check_run_status,
                deploy_contents: spec.deploy_contents.clone(),
                update_config: service.update_config,
                variable_yaml: service.variable_yaml.clone(),
                variable_kvs: deployable_kvs(service, env),
                image_and_modules: helm_modules(service, &template),
                timeout,
            };
            if spec.only_deploys_image() {
                task_spec.variable_yaml.clear();
                task_spec.variable_kvs.clear();
            }

            let mut task = self.inner.task(
                format!("{}-{}", service.service_name, self.inner.name()),
                fanout_key(self.inner.name(), &service.service_name),
                JobTaskSpec::HelmDeploy(task_spec),
            );
            decorate(&mut task, env, service);
            tasks.push(task);
        }
        Ok(tasks)
    }
}

fn set_default_contents(spec: &mut DeployJobSpec) {
    if spec.deploy_contents.is_empty() {
        spec.deploy_contents = vec![DeployContent::Image];
    }
}

fn decorate(task: &mut JobTask, env: &Environment, service: &DeployServiceInfo) {
    task.job_info
        .insert("env_name".to_string(), env.env_name.clone());
    task.job_info
        .insert("service_name".to_string(), service.service_name.clone());
    task.service_modules = service
        .modules
        .iter()
        .map(|m| WorkflowServiceModule::new(&service.service_name, &m.service_module))
        .collect();
    task.outputs = vec![ENV_NAME_OUTPUT.to_string()];
}

/// Variables a task carries: the latest list when config is updated, minus
/// the ones the environment takes from global variables
fn deployable_kvs(service: &DeployServiceInfo, env: &Environment) -> Vec<RenderVariableKV> {
    let kvs = if service.update_config {
        &service.latest_variable_kvs
    } else {
        &service.variable_kvs
    };
    let globals: HashSet<&str> = env
        .service(&service.service_name)
        .map(|s| {
            s.variable_kvs
                .iter()
                .filter(|kv| kv.use_global_variable)
                .map(|kv| kv.key.as_str())
                .collect()
        })
        .unwrap_or_default();
    kvs.iter()
        .filter(|kv| !globals.contains(kv.key.as_str()))
        .cloned()
        .collect()
}

fn helm_modules(service: &DeployServiceInfo, template: &ServiceTemplate) -> Vec<DeployServiceModule> {
    service
        .modules
        .iter()
        .map(|module| {
            let mut deploy_module = DeployServiceModule::from(module);
            deploy_module.image_path = template
                .containers
                .iter()
                .find(|c| c.name == module.service_module)
                .and_then(|c| c.image_path.clone());
            deploy_module
        })
        .collect()
}

/// Helm release name from the template's naming pattern
pub fn release_name(template: &ServiceTemplate, project: &str, env: &Environment) -> String {
    let pattern = if template.release_naming.is_empty() {
        DEFAULT_RELEASE_NAMING
    } else {
        &template.release_naming
    };
    pattern
        .replace("$Product$", project)
        .replace("$Namespace$", &env.namespace)
        .replace("$EnvName$", &env.env_name)
        .replace("$Service$", &template.service_name)
}

/// Follows from-job deploys back to the job that produced the images
pub fn origin_job_name(workflow: &Workflow, name: &str) -> String {
    let mut current = name.to_string();
    let mut seen = HashSet::new();
    while seen.insert(current.clone()) {
        let Some((_, job)) = workflow.find_job(&current) else {
            break;
        };
        if !matches!(job.job_type, JobType::ZadigDeploy | JobType::ZadigHelmDeploy) {
            break;
        }
        let Ok(spec) = job.decode_spec::<DeployJobSpec>() else {
            break;
        };
        if spec.source != DeploySource::FromJob || spec.job_name.is_empty() {
            break;
        }
        current = if spec.origin_job_name.is_empty() {
            spec.job_name
        } else {
            spec.origin_job_name
        };
    }
    current
}

/// Services and modules a quoted job produces, grouped by service in
/// declared order
pub fn quoted_services(
    workflow: &Workflow,
    current: &str,
    quoted: &str,
) -> Result<Vec<ServiceWithModuleAndImage>> {
    let job = find_quoted_job(workflow, current, quoted)?;
    let mut grouped: Vec<ServiceWithModuleAndImage> = Vec::new();
    let mut push = |service: &str, module: DeployModuleInfo| {
        match grouped.iter_mut().find(|s| s.service_name == service) {
            Some(existing) => existing.service_modules.push(module),
            None => grouped.push(ServiceWithModuleAndImage {
                service_name: service.to_string(),
                service_modules: vec![module],
            }),
        }
    };

    match job.job_type {
        JobType::ZadigBuild => {
            let spec: BuildJobSpec = job.decode_spec()?;
            for build in spec.service_and_builds {
                push(
                    &build.service_name,
                    DeployModuleInfo {
                        service_module: build.service_module,
                        image_name: build.image_name,
                        image: build.image,
                    },
                );
            }
        }
        JobType::ZadigDistributeImage => {
            let spec: DistributeImageJobSpec = job.decode_spec()?;
            for target in spec.targets {
                push(
                    &target.service_name,
                    DeployModuleInfo {
                        service_module: target.service_module,
                        image_name: target.image_name,
                        image: target.target_image,
                    },
                );
            }
        }
        JobType::ZadigDeploy | JobType::ZadigHelmDeploy => {
            let spec: DeployJobSpec = job.decode_spec()?;
            for service in spec.services {
                for module in service.modules {
                    push(&service.service_name, module);
                }
            }
        }
        other => {
            return Err(EngineError::dependency(format!(
                "job {} quotes {}, a {} job that produces no images",
                current, quoted, other
            )));
        }
    }
    Ok(grouped)
}

/// Deployable services of one environment, as offered to the user
///
/// Deployed services expose only the variables the author configured;
/// template services not yet in the environment expose all variables.
pub async fn env_deploy_services(
    ctx: &JobContext,
    env: &Environment,
    production: bool,
    deploy_contents: &[DeployContent],
    configs: &HashMap<String, Vec<DeployVariableConfig>>,
) -> Result<Vec<DeployServiceInfo>> {
    let project = ctx.catalog.find_project(&env.project).await?;

    if project.is_host_project() {
        return Ok(env
            .services
            .iter()
            .map(|service| DeployServiceInfo {
                service_name: service.service_name.clone(),
                variable_yaml: service.variable_yaml.clone(),
                update_config: false,
                updatable: false,
                deployed: true,
                modules: env_modules(service),
                ..Default::default()
            })
            .collect());
    }

    let update_config = deploy_contents.contains(&DeployContent::Vars);
    let templates: BTreeMap<String, ServiceTemplate> = ctx
        .catalog
        .list_services(&env.project, production)
        .await?
        .into_iter()
        .map(|t| (t.service_name.clone(), t))
        .collect();

    let mut services = Vec::new();
    for service in &env.services {
        let keys: HashSet<&str> = configs
            .get(&service.service_name)
            .map(|c| c.iter().map(|c| c.variable_key.as_str()).collect())
            .unwrap_or_default();
        let exposed = |kv: &RenderVariableKV| keys.contains(kv.key.as_str());

        let variable_kvs: Vec<RenderVariableKV> =
            service.variable_kvs.iter().filter(|kv| exposed(kv)).cloned().collect();

        let (latest_variable_kvs, updatable) = match templates.get(&service.service_name) {
            Some(template) => {
                let latest: Vec<RenderVariableKV> = template
                    .variable_kvs
                    .iter()
                    .map(|kv| {
                        service
                            .variable_kvs
                            .iter()
                            .find(|current| current.key == kv.key)
                            .cloned()
                            .unwrap_or_else(|| RenderVariableKV::from(kv))
                    })
                    .filter(|kv| exposed(kv))
                    .collect();
                let updatable = template.revision != service.revision || latest != variable_kvs;
                (latest, updatable)
            }
            None => (Vec::new(), false),
        };

        services.push(DeployServiceInfo {
            service_name: service.service_name.clone(),
            variable_configs: configs.get(&service.service_name).cloned().unwrap_or_default(),
            variable_kvs,
            latest_variable_kvs,
            variable_yaml: service.variable_yaml.clone(),
            update_config: update_config && updatable,
            updatable,
            deployed: true,
            modules: env_modules(service),
        });
    }

    for (name, template) in &templates {
        if env.service(name).is_some() {
            continue;
        }
        let kvs: Vec<RenderVariableKV> = template.variable_kvs.iter().map(RenderVariableKV::from).collect();
        services.push(DeployServiceInfo {
            service_name: name.clone(),
            variable_configs: configs.get(name).cloned().unwrap_or_default(),
            variable_kvs: kvs.clone(),
            latest_variable_kvs: kvs,
            variable_yaml: template.variable_yaml.clone(),
            update_config,
            updatable: true,
            deployed: false,
            modules: template
                .containers
                .iter()
                .map(|c| DeployModuleInfo {
                    service_module: c.name.clone(),
                    image_name: extract_image_name(&c.image),
                    image: c.image.clone(),
                })
                .collect(),
        });
    }
    Ok(services)
}

fn env_modules(service: &conduit_core::domain::environment::EnvService) -> Vec<DeployModuleInfo> {
    service
        .containers
        .iter()
        .map(|c| DeployModuleInfo {
            service_module: c.name.clone(),
            image_name: extract_image_name(&c.image),
            image: c.image.clone(),
        })
        .collect()
}

/// Keeps only the services and modules the author configured; an empty
/// configuration keeps everything
fn keep_configured(spec: &DeployJobSpec, services: Vec<DeployServiceInfo>) -> Vec<DeployServiceInfo> {
    if spec.service_and_images.is_empty() {
        return services;
    }
    services
        .into_iter()
        .filter_map(|mut service| {
            let allowed: HashSet<&str> = spec
                .service_and_images
                .iter()
                .filter(|c| c.service_name == service.service_name)
                .map(|c| c.service_module.as_str())
                .collect();
            if allowed.is_empty() {
                return None;
            }
            service
                .modules
                .retain(|m| allowed.contains(m.service_module.as_str()));
            Some(service)
        })
        .collect()
}

fn variable_configs(services: &[DeployServiceInfo]) -> HashMap<String, Vec<DeployVariableConfig>> {
    services
        .iter()
        .map(|s| (s.service_name.clone(), s.variable_configs.clone()))
        .collect()
}

#[async_trait]
impl JobConfigurator for DeployJob {
    fn to_job(&self) -> Result<Job> {
        self.inner.encode()
    }

    async fn instantiate(&mut self, _ctx: &JobContext) -> Result<()> {
        let spec = &mut self.inner.spec;
        set_default_contents(spec);
        if spec.source == DeploySource::FromJob && spec.job_name.is_empty() {
            return Err(EngineError::validation(format!(
                "deploy job {} takes its services from another job but names none",
                self.inner.job.name
            )));
        }
        Ok(())
    }

    async fn set_preset(&mut self, ctx: &JobContext) -> Result<()> {
        let project = ctx.catalog.find_project(&ctx.workflow.project).await?;
        self.inner.spec.deploy_type = project.deploy_type;

        if self.inner.spec.source == DeploySource::FromJob {
            let quoted = self.inner.spec.job_name.clone();
            self.inner.spec.origin_job_name = quoted.clone();
            self.inner.spec.job_name = origin_job_name(&ctx.workflow, &quoted);
            return Ok(());
        }

        let env_name = strip_fixed_mark(&self.inner.spec.env).to_string();
        if env_name.is_empty() {
            return Ok(());
        }
        let env = ctx.catalog.find_env(&project.name, &env_name).await?;
        let spec = &self.inner.spec;
        let services = env_deploy_services(
            ctx,
            &env,
            spec.production,
            &spec.deploy_contents,
            &variable_configs(&spec.services),
        )
        .await?;
        let mut services = keep_configured(spec, services);
        for service in &mut services {
            if !service.updatable {
                service.update_config = false;
            }
        }
        self.inner.spec.services = services;
        Ok(())
    }

    async fn set_options(&mut self, ctx: &JobContext) -> Result<()> {
        let latest = ctx.catalog.find_workflow(&ctx.workflow.name).await?;
        let author: DeployJobSpec = match latest.find_job(&self.inner.job.name) {
            Some((_, job)) => job.decode_spec()?,
            None => self.inner.spec.clone(),
        };
        let configs = variable_configs(&author.services);

        let envs = if self.inner.spec.env.starts_with(FIXED_VALUE_MARK) {
            let name = strip_fixed_mark(&self.inner.spec.env);
            vec![ctx.catalog.find_env(&ctx.workflow.project, name).await?]
        } else {
            ctx.catalog
                .list_envs(&ctx.workflow.project, self.inner.spec.production)
                .await?
                .into_iter()
                .filter(|env| !env.is_sleeping)
                .collect()
        };

        let mut options = Vec::new();
        for env in &envs {
            let services = env_deploy_services(
                ctx,
                env,
                self.inner.spec.production,
                &self.inner.spec.deploy_contents,
                &configs,
            )
            .await?;
            options.push(DeployEnvInformation {
                env: env.env_name.clone(),
                registry_id: env.registry_id.clone(),
                services: keep_configured(&author, services),
            });
        }
        self.inner.spec.env_options = options;
        Ok(())
    }

    fn clear_selection(&mut self) {
        self.inner.spec.services.clear();
    }

    async fn update_with_latest_setting(&mut self, ctx: &JobContext) -> Result<()> {
        let latest_workflow = ctx.catalog.find_workflow(&ctx.workflow.name).await?;
        let Some((_, latest_job)) = latest_workflow.find_job(&self.inner.job.name) else {
            return Err(EngineError::not_found(format!(
                "job {} no longer exists in workflow {}",
                self.inner.job.name, latest_workflow.name
            )));
        };
        if !matches!(latest_job.job_type, JobType::ZadigDeploy | JobType::ZadigHelmDeploy) {
            return Err(EngineError::validation(format!(
                "job {} is no longer a deploy job",
                self.inner.job.name
            )));
        }
        let mut latest: DeployJobSpec = latest_job.decode_spec()?;
        set_default_contents(&mut latest);

        let spec = &mut self.inner.spec;
        if spec.source == DeploySource::FromJob && latest.source == DeploySource::Runtime {
            spec.services.clear();
        }
        spec.production = latest.production;
        spec.skip_check_run_status = latest.skip_check_run_status;
        spec.deploy_contents = latest.deploy_contents.clone();
        spec.source = latest.source;
        spec.job_name = latest.job_name.clone();
        spec.origin_job_name = latest.origin_job_name.clone();
        spec.service_and_images = latest.service_and_images.clone();

        let env_name = strip_fixed_mark(&spec.env).to_string();
        if env_name.is_empty() {
            return Ok(());
        }

        let mut configs = variable_configs(&spec.services);
        configs.extend(variable_configs(&latest.services));

        let env = ctx.catalog.find_env(&ctx.workflow.project, &env_name).await?;
        let computed =
            env_deploy_services(ctx, &env, spec.production, &spec.deploy_contents, &configs).await?;

        let user: HashMap<String, DeployServiceInfo> = spec
            .services
            .drain(..)
            .map(|s| (s.service_name.clone(), s))
            .collect();

        let mut merged = Vec::new();
        for mut service in computed {
            let Some(selected) = user.get(&service.service_name) else {
                continue;
            };
            override_values(&mut service.variable_kvs, &selected.variable_kvs);
            override_values(&mut service.latest_variable_kvs, &selected.latest_variable_kvs);
            service.variable_yaml =
                merge_yaml(&[service.variable_yaml.as_str(), selected.variable_yaml.as_str()])?;

            let existing: HashSet<&str> = service
                .modules
                .iter()
                .map(|m| m.service_module.as_str())
                .collect();
            let modules = selected
                .modules
                .iter()
                .filter(|m| existing.contains(m.service_module.as_str()))
                .cloned()
                .collect();
            service.modules = modules;
            service.update_config = selected.update_config;
            merged.push(service);
        }
        spec.services = merged;
        Ok(())
    }

    fn merge_args(&mut self, args: &Job) -> Result<()> {
        if args.name != self.inner.job.name || args.job_type != self.inner.job.job_type {
            return Ok(());
        }
        let args: DeployJobSpec = args.decode_spec()?;
        self.inner.spec.env = args.env;
        self.inner.spec.services = args.services;
        Ok(())
    }

    async fn lint(&self, ctx: &JobContext) -> Result<()> {
        let spec = &self.inner.spec;
        if ctx.license == License::Basic {
            if spec.production {
                return Err(EngineError::configuration(
                    "production deploys require a professional license",
                ));
            }
            if spec.deploys(DeployContent::Vars) || spec.deploys(DeployContent::Config) {
                return Err(EngineError::configuration(
                    "deploying variables or configuration requires a professional license",
                ));
            }
        }
        if spec.source == DeploySource::FromJob {
            ensure_quoted_earlier(&ctx.workflow, self.inner.name(), self.quoted_job())?;
        }
        Ok(())
    }

    async fn to_jobs(&self, ctx: &JobContext, task_id: i64) -> Result<Vec<JobTask>> {
        let spec = &self.inner.spec;
        let env_name = strip_fixed_mark(&spec.env);
        if env_name.is_empty() {
            return Err(EngineError::validation(format!(
                "deploy job {} has no environment",
                self.inner.name()
            )));
        }
        let project = ctx.catalog.find_project(&ctx.workflow.project).await?;
        let env = ctx.catalog.find_env(&project.name, env_name).await?;
        let services = self.resolve_services(&ctx.workflow)?;

        let tasks = match project.deploy_type {
            DeployType::Kubernetes => self.k8s_tasks(ctx, &project, &env, &services).await?,
            DeployType::Helm => self.helm_tasks(ctx, &project, &env, &services).await?,
        };
        info!(
            "Deploy job {} of task {} expanded into {} tasks for env {}",
            self.inner.name(),
            task_id,
            tasks.len(),
            env_name
        );
        Ok(tasks)
    }

    fn outputs(&self) -> Vec<String> {
        vec![output_key(self.inner.name(), ENV_NAME_OUTPUT)]
    }
}

fn override_values(target: &mut [RenderVariableKV], overrides: &[RenderVariableKV]) {
    for kv in target.iter_mut() {
        if let Some(user) = overrides.iter().find(|o| o.key == kv.key) {
            kv.value = user.value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{job_context, job_context_with_license};
    use conduit_core::domain::job_spec::{BuildJobSpec, ServiceAndBuild};
    use conduit_core::domain::workflow::Stage;
    use serde_json::json;

    fn module(name: &str, image: &str) -> DeployModuleInfo {
        DeployModuleInfo {
            service_module: name.to_string(),
            image: image.to_string(),
            image_name: extract_image_name(image),
        }
    }

    fn selected(service: &str, modules: Vec<DeployModuleInfo>) -> DeployServiceInfo {
        DeployServiceInfo {
            service_name: service.to_string(),
            modules,
            ..Default::default()
        }
    }

    fn deploy_job(name: &str, spec: &DeployJobSpec) -> Job {
        Job::new(name, JobType::ZadigDeploy, serde_json::to_value(spec).unwrap())
    }

    fn workflow(project: &str, stages: Vec<Vec<Job>>) -> Workflow {
        Workflow {
            name: "release".to_string(),
            project: project.to_string(),
            stages: stages
                .into_iter()
                .enumerate()
                .map(|(i, jobs)| Stage {
                    name: format!("stage-{}", i),
                    parallel: false,
                    approval: None,
                    jobs,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn image_only_spec() -> DeployJobSpec {
        DeployJobSpec {
            env: "dev".to_string(),
            services: vec![
                selected("a", vec![module("web", "repo/a:v2")]),
                selected("b", vec![module("api", "repo/b:v2")]),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_contents_is_image() {
        let job = DeployJob::new(&deploy_job("deploy", &DeployJobSpec::default())).unwrap();
        assert_eq!(job.spec().deploy_contents, vec![DeployContent::Image]);
    }

    #[tokio::test]
    async fn test_image_only_deploy_fans_out_per_service() {
        let job = deploy_job("deploy", &image_only_spec());
        let ctx = job_context(workflow("shop", vec![vec![job.clone()]]));
        let configurator = DeployJob::new(&job).unwrap();

        let tasks = configurator.to_jobs(&ctx, 1).await.unwrap();
        let keys: Vec<&str> = tasks.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["deploy.a", "deploy.b"]);

        for task in &tasks {
            let JobTaskSpec::Deploy(spec) = &task.spec else {
                panic!("expected a deploy task");
            };
            assert!(spec.variable_kvs.is_empty());
            assert!(spec.variable_configs.is_empty());
            assert_eq!(spec.service_and_images.len(), 1);
            assert_eq!(spec.namespace, "shop-dev");
            assert_eq!(spec.timeout, 600);
        }
        let JobTaskSpec::Deploy(first) = &tasks[0].spec else {
            unreachable!()
        };
        assert_eq!(first.service_and_images[0].image, "repo/a:v2");
        assert!(first.yaml.contains("repo/a:v2"));
    }

    #[tokio::test]
    async fn test_expansion_is_idempotent() {
        let job = deploy_job("deploy", &image_only_spec());
        let ctx = job_context(workflow("shop", vec![vec![job.clone()]]));
        let configurator = DeployJob::new(&job).unwrap();

        let first = configurator.to_jobs(&ctx, 1).await.unwrap();
        let second = configurator.to_jobs(&ctx, 1).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_from_job_carries_build_image() {
        let build = Job::new(
            "build",
            JobType::ZadigBuild,
            serde_json::to_value(BuildJobSpec {
                service_and_builds: vec![ServiceAndBuild {
                    service_name: "a".to_string(),
                    service_module: "web".to_string(),
                    image: "repo/a:v2".to_string(),
                    image_name: "a".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap(),
        );
        let deploy = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "dev".to_string(),
                source: DeploySource::FromJob,
                job_name: "build".to_string(),
                services: vec![selected("a", Vec::new()), selected("b", Vec::new())],
                ..Default::default()
            },
        );
        let ctx = job_context(workflow("shop", vec![vec![build], vec![deploy.clone()]]));
        let configurator = DeployJob::new(&deploy).unwrap();
        configurator.lint(&ctx).await.unwrap();

        let tasks = configurator.to_jobs(&ctx, 7).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let JobTaskSpec::Deploy(spec) = &tasks[0].spec else {
            panic!("expected a deploy task");
        };
        assert_eq!(spec.service_and_images[0].image, "repo/a:v2");
        assert!(spec.yaml.contains(IMAGE_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_from_job_follows_deploy_chain() {
        let build = Job::new(
            "build",
            JobType::ZadigBuild,
            json!({"service_and_builds": [{"service_name": "a", "service_module": "web", "image": "repo/a:v3"}]}),
        );
        let first = deploy_job(
            "deploy-dev",
            &DeployJobSpec {
                source: DeploySource::FromJob,
                job_name: "build".to_string(),
                ..Default::default()
            },
        );
        let second = deploy_job(
            "deploy-qa",
            &DeployJobSpec {
                source: DeploySource::FromJob,
                job_name: "deploy-dev".to_string(),
                ..Default::default()
            },
        );
        let workflow = workflow("shop", vec![vec![build], vec![first], vec![second]]);
        assert_eq!(origin_job_name(&workflow, "deploy-qa"), "build");
        assert_eq!(origin_job_name(&workflow, "build"), "build");
    }

    #[tokio::test]
    async fn test_quoting_later_job_fails_lint() {
        let deploy = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "dev".to_string(),
                source: DeploySource::FromJob,
                job_name: "build".to_string(),
                ..Default::default()
            },
        );
        let build = Job::new("build", JobType::ZadigBuild, json!({}));
        let ctx = job_context(workflow("shop", vec![vec![deploy.clone()], vec![build]]));
        let err = DeployJob::new(&deploy).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_basic_license_forbids_production() {
        let deploy = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "prod".to_string(),
                production: true,
                ..Default::default()
            },
        );
        let ctx = job_context_with_license(workflow("shop", vec![vec![deploy.clone()]]), License::Basic);
        let err = DeployJob::new(&deploy).unwrap().lint(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_vars_deploy_filters_global_variables() {
        let spec = DeployJobSpec {
            env: "dev".to_string(),
            deploy_contents: vec![DeployContent::Image, DeployContent::Vars],
            services: vec![DeployServiceInfo {
                service_name: "a".to_string(),
                variable_kvs: vec![
                    RenderVariableKV::new("replicas", json!(3)),
                    RenderVariableKV::new("domain", json!("example.com")),
                ],
                modules: vec![module("web", "repo/a:v2")],
                ..Default::default()
            }],
            ..Default::default()
        };
        let job = deploy_job("deploy", &spec);
        let ctx = job_context(workflow("shop", vec![vec![job.clone()]]));
        let tasks = DeployJob::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap();

        let JobTaskSpec::Deploy(task) = &tasks[0].spec else {
            panic!("expected a deploy task");
        };
        let keys: Vec<&str> = task.variable_kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["replicas"]);
        assert!(task.yaml.contains("replicas: 3"));
    }

    #[tokio::test]
    async fn test_preset_lists_env_services() {
        let spec = DeployJobSpec {
            env: "dev".to_string(),
            services: vec![DeployServiceInfo {
                service_name: "a".to_string(),
                variable_configs: vec![DeployVariableConfig {
                    variable_key: "replicas".to_string(),
                    source: "runtime".to_string(),
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let job = deploy_job("deploy", &spec);
        let ctx = job_context(workflow("shop", vec![vec![job.clone()]]));
        let mut configurator = DeployJob::new(&job).unwrap();
        configurator.set_preset(&ctx).await.unwrap();

        let services = &configurator.spec().services;
        let names: Vec<&str> = services.iter().map(|s| s.service_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let a = &services[0];
        assert!(a.deployed);
        assert_eq!(a.variable_kvs.len(), 1);
        assert_eq!(a.variable_kvs[0].key, "replicas");
        assert!(!a.update_config);

        let c = &services[2];
        assert!(!c.deployed);
        assert!(c.updatable);
    }

    #[tokio::test]
    async fn test_host_project_services_are_not_updatable() {
        let job = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "prod".to_string(),
                ..Default::default()
            },
        );
        let ctx = job_context(workflow("legacy", vec![vec![job.clone()]]));
        let mut configurator = DeployJob::new(&job).unwrap();
        configurator.set_preset(&ctx).await.unwrap();
        let services = &configurator.spec().services;
        assert_eq!(services.len(), 1);
        assert!(!services[0].updatable);
        assert!(services[0].variable_kvs.is_empty());
    }

    #[tokio::test]
    async fn test_host_project_requires_deployed_service() {
        let job = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "prod".to_string(),
                services: vec![selected("ghost", vec![module("x", "repo/x:v1")])],
                ..Default::default()
            },
        );
        let ctx = job_context(workflow("legacy", vec![vec![job.clone()]]));
        let err = DeployJob::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_helm_deploy_uses_release_naming() {
        let job = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "dev".to_string(),
                services: vec![
                    selected("chart-a", vec![module("web", "repo/ca:v2")]),
                    selected("chart-b", vec![module("api", "repo/cb:v2")]),
                ],
                ..Default::default()
            },
        );
        let ctx = job_context(workflow("charts", vec![vec![job.clone()]]));
        let tasks = DeployJob::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap();
        assert_eq!(tasks.len(), 2);

        let JobTaskSpec::HelmDeploy(a) = &tasks[0].spec else {
            panic!("expected a helm task");
        };
        assert_eq!(a.release_name, "charts-dev-chart-a");
        assert_eq!(a.service_revision, 2);
        assert_eq!(a.timeout, 300);
        assert_eq!(
            a.image_and_modules[0].image_path.as_ref().map(|p| p.tag.as_str()),
            Some("image.tag")
        );

        let JobTaskSpec::HelmDeploy(b) = &tasks[1].spec else {
            panic!("expected a helm task");
        };
        assert_eq!(b.release_name, "dev-chart-b");
    }

    #[tokio::test]
    async fn test_update_with_latest_setting_is_stable() {
        let spec = DeployJobSpec {
            env: "dev".to_string(),
            deploy_contents: vec![DeployContent::Image, DeployContent::Vars],
            services: vec![DeployServiceInfo {
                service_name: "a".to_string(),
                variable_configs: vec![DeployVariableConfig {
                    variable_key: "replicas".to_string(),
                    source: "runtime".to_string(),
                }],
                variable_kvs: vec![RenderVariableKV::new("replicas", json!(4))],
                latest_variable_kvs: vec![RenderVariableKV::new("replicas", json!(4))],
                update_config: true,
                modules: vec![module("web", "repo/a:v9")],
                ..Default::default()
            }],
            ..Default::default()
        };
        let job = deploy_job("deploy", &spec);
        let ctx = job_context(workflow("shop", vec![vec![job.clone()]]));

        let original = DeployJob::new(&job).unwrap().to_jobs(&ctx, 1).await.unwrap();

        let mut configurator = DeployJob::new(&job).unwrap();
        configurator.update_with_latest_setting(&ctx).await.unwrap();
        let services = &configurator.spec().services;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].modules[0].image, "repo/a:v9");
        assert_eq!(services[0].variable_kvs[0].value, json!(4));

        let reconciled = configurator.to_jobs(&ctx, 1).await.unwrap();
        let specs = |tasks: &[JobTask]| -> Vec<(Vec<DeployServiceModule>, Vec<RenderVariableKV>)> {
            tasks
                .iter()
                .map(|t| match &t.spec {
                    JobTaskSpec::Deploy(s) => (s.service_and_images.clone(), s.variable_kvs.clone()),
                    _ => unreachable!(),
                })
                .collect()
        };
        assert_eq!(specs(&original), specs(&reconciled));
    }

    #[test]
    fn test_merge_args_takes_env_and_services() {
        let stored = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "dev".to_string(),
                skip_check_run_status: true,
                ..Default::default()
            },
        );
        let args = deploy_job(
            "deploy",
            &DeployJobSpec {
                env: "qa".to_string(),
                services: vec![selected("a", vec![module("web", "repo/a:v5")])],
                ..Default::default()
            },
        );
        let mut configurator = DeployJob::new(&stored).unwrap();
        configurator.merge_args(&args).unwrap();
        assert_eq!(configurator.spec().env, "qa");
        assert_eq!(configurator.spec().services.len(), 1);
        assert!(configurator.spec().skip_check_run_status);
    }
}

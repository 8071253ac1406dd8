//! Kueue secret copy: turns a managed-service-account token secret in a cluster namespace
//! into a kubeconfig secret MultiKueue can read, and records it as a ClusterProfile
//! credential.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use ocm_apply::{create_or_update, patch_status_if_changed, Writer};
use ocm_core::inventory::{AccessRef, Credential};
use ocm_core::labels;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster_profile::PROPERTY_URL;
use crate::{error_policy, log_result, Context, Error};

/// Consumer name of the credential recorded on the ClusterProfile.
pub const CREDENTIAL_CONSUMER: &str = "kueue-admin";
pub const KUBECONFIG_KEY: &str = "kubeconfig";
const TOKEN_KEY: &str = "token";
const CA_KEY: &str = "ca.crt";

pub fn kubeconfig_secret_name(secret: &str) -> String { format!("{}-kubeconfig", secret) }

pub fn is_managed_service_account(secret: &Secret) -> bool { secret.labels().get(labels::MANAGED_SERVICE_ACCOUNT).is_some_and(|v| !v.is_empty()) }

/// Client configuration in the kubectl `Config` layout, reduced to token authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
    pub kind: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub cluster: ClusterEntry,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub certificate_authority_data: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub context: ContextEntry,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub token: String,
}

impl Kubeconfig {
    /// Single-context config for `cluster`, authenticating as `user`.
    pub fn with_token(ca: &[u8], server: &str, cluster: &str, user: &str, token: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            clusters: vec![NamedCluster {
                cluster: ClusterEntry { certificate_authority_data: STANDARD.encode(ca), server: server.to_string() },
                name: cluster.to_string(),
            }],
            contexts: vec![NamedContext {
                context: ContextEntry { cluster: cluster.to_string(), user: user.to_string() },
                name: cluster.to_string(),
            }],
            current_context: cluster.to_string(),
            kind: "Config".to_string(),
            preferences: BTreeMap::new(),
            users: vec![NamedUser { name: user.to_string(), user: UserEntry { token: token.to_string() } }],
        }
    }
}

/// Token kubeconfig for `cluster`, authenticating as `user`, as YAML.
pub fn render_kubeconfig(ca: &[u8], server: &str, cluster: &str, user: &str, token: &str) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&Kubeconfig::with_token(ca, server, cluster, user, token))
}

fn field<'a>(secret: &'a Secret, key: &'static str) -> Result<&'a [u8], Error> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
        .ok_or_else(|| Error::Incomplete { kind: "Secret", name: secret.name_any(), field: key })
}

pub async fn reconcile<W: Writer>(secret: Arc<Secret>, ctx: Arc<Context<W>>) -> Result<Action, Error> {
    if !is_managed_service_account(&secret) {
        return Ok(Action::await_change());
    }
    let name = secret.name_any();
    let cluster = secret.namespace().unwrap_or_default();
    let profile = ctx.listers.cluster_profiles.get(Some(&ctx.config.cluster_profile_namespace), &cluster)?;
    let server = profile.property(PROPERTY_URL).ok_or_else(|| Error::Incomplete { kind: "ClusterProfile", name: cluster.clone(), field: "url property" })?;
    let token = String::from_utf8_lossy(field(&secret, TOKEN_KEY)?).into_owned();
    let kubeconfig = render_kubeconfig(field(&secret, CA_KEY)?, server, &profile.name_any(), &name, &token)?;

    let target = kubeconfig_secret_name(&name);
    let ns = &ctx.config.kueue_namespace;
    let desired = Secret {
        metadata: ObjectMeta { name: Some(target.clone()), namespace: Some(ns.clone()), ..Default::default() },
        data: Some(BTreeMap::from([(KUBECONFIG_KEY.to_string(), ByteString(kubeconfig.into_bytes()))])),
        ..Default::default()
    };
    let existing = ctx.listers.kueue_secrets.get(Some(ns), &target).ok();
    create_or_update(&ctx.writer, existing.as_deref(), desired, |a, b| a.data != b.data).await?;

    let old = profile.status.clone().unwrap_or_default();
    let mut status = old.clone();
    status.credentials = vec![Credential {
        consumer: CREDENTIAL_CONSUMER.to_string(),
        access_ref: AccessRef { kind: "Secret".to_string(), name: target.clone(), namespace: ns.clone() },
    }];
    if patch_status_if_changed(&ctx.writer, profile.as_ref(), &status, &old).await? {
        info!(cluster = %cluster, secret = %target, "kubeconfig credential recorded");
    } else {
        debug!(cluster = %cluster, secret = %target, "kubeconfig secret in sync");
    }
    Ok(Action::await_change())
}

pub fn controller<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) -> BoxFuture<'static, ()> {
    Controller::new(Api::<Secret>::all(client), watcher::Config::default().labels(labels::MANAGED_SERVICE_ACCOUNT))
        .with_config(controller::Config::default().concurrency(ctx.config.workers))
        .shutdown_on_signal()
        .run(reconcile::<W>, error_policy::<Secret, W>, ctx)
        .for_each(log_result)
        .boxed()
}

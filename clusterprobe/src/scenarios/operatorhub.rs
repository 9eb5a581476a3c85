//! Operator-backed service scenarios for `odo service`, `odo catalog` and
//! `odo link`.
//!
//! Each scenario runs in its own project. Error-message substrings asserted
//! here are the contract of the CLI under test.

use std::path::Path;

use clusterprobe_common::HarnessResult;
use clusterprobe_common::e2e::{
    Cmd, ExitPolicy, MatchFailure, ScenarioContext, ScenarioSpec, match_all_in_output,
    rand_string,
};
use clusterprobe_common::errors::HarnessError;
use regex::Regex;

use super::Scenario;

/// Operators the cluster setup installs; every scenario waits for both.
pub const REQUIRED_OPERATORS: [&str; 2] = ["etcdoperator", "service-binding-operator"];

const ETCD_OPERATOR_PATTERN: &str = r"etcdoperator\.*[a-z][0-9]\.[0-9]\.[0-9]-clusterwide";

const DEVFILE_FIXTURE: &str = "source/devfiles/nodejs/devfile.yaml";
const DEVFILE: &str = "devfile.yaml";

const EXAMPLE_SERVICE: &str = "EtcdCluster/example";

const NO_METADATA_YAML: &str = "
apiVersion: etcd.database.coreos.com/v1beta2
kind: EtcdCluster
spec:
  size: 3
  version: 3.2.13
";

const INVALID_METADATA_YAML: &str = "
apiVersion: etcd.database.coreos.com/v1beta2
kind: EtcdCluster
metadata:
  noname: noname
spec:
  size: 3
  version: 3.2.13
";

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            ScenarioSpec::new("operators/list-installed"),
            list_installed_operators,
        ),
        Scenario::new(
            ScenarioSpec::new("operators/reject-interactive-create"),
            reject_interactive_create,
        ),
        Scenario::new(
            ScenarioSpec::new("service/create-list-delete-alm-example"),
            create_list_delete_alm_example,
        ),
        Scenario::new(
            ScenarioSpec::new("service/create-with-cli-name"),
            create_with_cli_name,
        ),
        Scenario::new(
            ScenarioSpec::new("service/delete-invalid-names").without_project(),
            delete_invalid_names,
        ),
        Scenario::new(ScenarioSpec::new("service/dry-run"), dry_run),
        Scenario::new(ScenarioSpec::new("catalog/search"), catalog_search),
        Scenario::new(
            ScenarioSpec::new("from-file/create").with_workdir(),
            from_file_create,
        ),
        Scenario::new(
            ScenarioSpec::new("from-file/create-with-cli-name").with_workdir(),
            from_file_create_with_cli_name,
        ),
        Scenario::new(
            ScenarioSpec::new("from-file/metadata-validation").with_workdir(),
            from_file_metadata_validation,
        ),
        Scenario::new(ScenarioSpec::new("json/catalog-list"), json_catalog_list),
        Scenario::new(ScenarioSpec::new("json/service-list"), json_service_list),
        Scenario::new(
            ScenarioSpec::new("link/invalid-service-name")
                .openshift_only()
                .with_workdir(),
            link_invalid_service_name,
        ),
        Scenario::new(
            ScenarioSpec::new("link/missing-service")
                .openshift_only()
                .with_workdir(),
            link_missing_service,
        ),
        Scenario::new(
            ScenarioSpec::new("link/link-and-unlink")
                .openshift_only()
                .with_workdir(),
            link_and_unlink,
        ),
        Scenario::new(
            ScenarioSpec::new("link/binding-deleted-outside-odo")
                .openshift_only()
                .with_workdir(),
            binding_deleted_outside_odo,
        ),
    ]
}

/// Switch odo to the scenario project and wait until the catalog lists every
/// operator the cluster setup installed.
fn pre_setup(ctx: &ScenarioContext) -> HarnessResult<()> {
    ctx.pass(&ctx.odo(["project", "set", ctx.project()]))?;
    for operator in REQUIRED_OPERATORS {
        ctx.wait_for(
            ctx.odo(["catalog", "list", "services"]),
            &format!("operator {operator} in the service catalog"),
            ctx.config().operator_poll(),
            ExitPolicy::FailFast,
            |out| out.contains(operator),
        )?;
    }
    Ok(())
}

/// Link scenarios work on a component built from the nodejs devfile.
fn link_setup(ctx: &ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    ctx.copy_example_devfile(Path::new(DEVFILE_FIXTURE), Path::new(DEVFILE))?;
    Ok(())
}

fn expect_contains(output: &str, needle: &str) -> HarnessResult<()> {
    match_all_in_output(output, &[needle])?;
    Ok(())
}

/// First match of `pattern` in `output`, or an output-mismatch error.
pub fn find_match(output: &str, pattern: &str) -> HarnessResult<String> {
    let re = Regex::new(pattern)
        .map_err(|e| HarnessError::Config(format!("invalid pattern {pattern}: {e}")))?;
    re.find(output)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            HarnessError::OutputMismatch(MatchFailure {
                missing: vec![pattern.to_string()],
                output: output.to_string(),
            })
        })
}

/// Full name of the etcd operator from `odo catalog list services` output.
pub fn etcd_operator_name(catalog: &str) -> HarnessResult<String> {
    find_match(catalog, ETCD_OPERATOR_PATTERN)
}

/// Pattern matching the pods the etcd operator starts for service `name`.
pub fn pod_pattern(name: &str) -> String {
    format!("{}-.[a-z0-9]*", regex::escape(name))
}

fn etcd_operator(ctx: &ScenarioContext) -> HarnessResult<String> {
    let catalog = ctx.pass(&ctx.odo(["catalog", "list", "services"]))?;
    etcd_operator_name(&catalog)
}

fn oc_in_project(ctx: &ScenarioContext, args: &[&str]) -> Cmd {
    ctx.oc(args.iter().copied().chain(["-n", ctx.project()]))
}

/// Wait until a pod for service `name` exists and reports phase `Running`.
fn wait_for_service_pod(ctx: &ScenarioContext, name: &str) -> HarnessResult<()> {
    let pattern = pod_pattern(name);
    let re = Regex::new(&pattern)
        .map_err(|e| HarnessError::Config(format!("invalid pattern {pattern}: {e}")))?;
    let pods = ctx.wait_for(
        oc_in_project(ctx, &["get", "pods"]),
        &format!("a pod matching {pattern}"),
        ctx.config().pod_poll(),
        ExitPolicy::FailFast,
        |out| re.is_match(out),
    )?;
    let pod = find_match(&pods.stdout, &pattern)?;

    ctx.wait_for(
        oc_in_project(
            ctx,
            &["get", "pods", pod.as_str(), "-o", "template=\"{{.status.phase}}\""],
        ),
        &format!("pod {pod} to be Running"),
        ctx.config().pod_poll(),
        ExitPolicy::FailFast,
        |out| out.contains("Running"),
    )?;
    Ok(())
}

fn create_service(ctx: &ScenarioContext, operator: &str, extra: &[&str]) -> HarnessResult<String> {
    let service_type = format!("{operator}/EtcdCluster");
    let args = ["service", "create", service_type.as_str()]
        .into_iter()
        .chain(extra.iter().copied())
        .chain(["--project", ctx.project()]);
    ctx.pass(&ctx.odo(args))
}

fn list_installed_operators(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let out = ctx.pass(&ctx.odo(["catalog", "list", "services"]))?;
    match_all_in_output(&out, &["Services available through Operators", "etcdoperator"])?;
    Ok(())
}

fn reject_interactive_create(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let err = ctx.fail(&ctx.odo(["service", "create"]))?;
    expect_contains(
        &err,
        "please use a valid command to start an Operator backed service",
    )
}

fn create_list_delete_alm_example(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let operator = etcd_operator(ctx)?;
    let out = create_service(ctx, &operator, &[])?;
    expect_contains(&out, "Service 'example' was created")?;

    wait_for_service_pod(ctx, "example")?;

    let out = ctx.pass(&ctx.odo(["service", "list"]))?;
    expect_contains(&out, EXAMPLE_SERVICE)?;

    ctx.pass(&ctx.odo(["service", "delete", EXAMPLE_SERVICE, "-f"]))?;

    let err = ctx.fail(&ctx.odo(["service", "delete", EXAMPLE_SERVICE, "-f"]))?;
    expect_contains(&err, "Couldn't find service named")
}

fn create_with_cli_name(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let name = rand_string(6);
    let full_name = format!("EtcdCluster/{name}");
    let operator = etcd_operator(ctx)?;
    create_service(ctx, &operator, &[name.as_str()])?;

    wait_for_service_pod(ctx, &name)?;

    let service_type = format!("{operator}/EtcdCluster");
    let err = ctx.fail(&ctx.odo([
        "service",
        "create",
        service_type.as_str(),
        name.as_str(),
        "--project",
        ctx.project(),
    ]))?;
    expect_contains(&err, &format!("service \"{full_name}\" already exists"))?;

    ctx.pass(&ctx.odo(["service", "delete", full_name.as_str(), "-f"]))?;
    Ok(())
}

fn delete_invalid_names(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    for name in ["EtcdCluster", "EtcdCluster/", "/example"] {
        let err = ctx.fail(&ctx.odo(["service", "delete", name, "-f"]))?;
        expect_contains(&err, &format!("couldn't split \"{name}\" into exactly two"))?;
    }
    Ok(())
}

fn dry_run(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let operator = etcd_operator(ctx)?;
    let out = create_service(ctx, &operator, &["--dry-run"])?;
    match_all_in_output(&out, &["apiVersion", "kind"])?;
    Ok(())
}

fn catalog_search(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    for query in ["etcd", "EtcdCluster"] {
        let out = ctx.pass(&ctx.odo(["catalog", "search", "service", query]))?;
        match_all_in_output(&out, &["etcdoperator", "EtcdCluster"])?;
    }

    let err = ctx.fail(&ctx.odo(["catalog", "search", "service", "dummy"]))?;
    expect_contains(&err, "no service matched the query: dummy")
}

/// Render the operator's example CR with `--dry-run` and store it as YAML.
fn write_dry_run_spec(ctx: &ScenarioContext) -> HarnessResult<String> {
    let operator = etcd_operator(ctx)?;
    let yaml = create_service(ctx, &operator, &["--dry-run"])?;
    let path = ctx.write_file(&format!("{}.yaml", rand_string(6)), &yaml)?;
    Ok(path.to_string_lossy().into_owned())
}

fn from_file_create(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let file = write_dry_run_spec(ctx)?;
    ctx.pass(&ctx.odo([
        "service",
        "create",
        "--from-file",
        file.as_str(),
        "--project",
        ctx.project(),
    ]))?;

    wait_for_service_pod(ctx, "example")?;

    ctx.pass(&ctx.odo(["service", "delete", EXAMPLE_SERVICE, "-f"]))?;
    Ok(())
}

fn from_file_create_with_cli_name(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let name = rand_string(6);
    let file = write_dry_run_spec(ctx)?;
    let create = ctx.odo([
        "service",
        "create",
        "--from-file",
        file.as_str(),
        name.as_str(),
        "--project",
        ctx.project(),
    ]);
    ctx.pass(&create)?;

    let err = ctx.fail(&create)?;
    expect_contains(
        &err,
        "please provide a different name or delete the existing service first",
    )
}

fn from_file_metadata_validation(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let cases = [
        (NO_METADATA_YAML, "couldn't find \"metadata\" in the yaml"),
        (INVALID_METADATA_YAML, "couldn't find metadata.name in the yaml"),
    ];
    for (yaml, expected) in cases {
        let path = ctx.write_file(&format!("{}.yaml", rand_string(6)), yaml)?;
        let file = path.to_string_lossy();
        let err = ctx.fail(&ctx.odo([
            "service",
            "create",
            "--from-file",
            &*file,
            "--project",
            ctx.project(),
        ]))?;
        expect_contains(&err, expected)?;
    }
    Ok(())
}

fn json_catalog_list(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let out = ctx.pass(&ctx.odo(["catalog", "list", "services", "-o", "json"]))?;
    expect_contains(&out, "etcdoperator")
}

fn json_service_list(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    pre_setup(ctx)?;
    let operator = etcd_operator(ctx)?;
    create_service(ctx, &operator, &[])?;

    wait_for_service_pod(ctx, "example")?;

    let out = ctx.pass(&ctx.odo(["service", "list"]))?;
    match_all_in_output(&out, &["example", "EtcdCluster"])?;

    let json = ctx.pass(&ctx.odo(["service", "list", "-o", "json"]))?;
    match_all_in_output(
        &json,
        &[
            "\"apiVersion\": \"etcd.database.coreos.com/v1beta2\"",
            "\"kind\": \"EtcdCluster\"",
            "\"name\": \"example\"",
        ],
    )?;

    ctx.pass(&ctx.odo(["service", "delete", EXAMPLE_SERVICE, "-f"]))?;

    let err = ctx.fail(&ctx.odo(["service", "list"]))?;
    let json_err = ctx.fail(&ctx.odo(["service", "list", "-o", "json"]))?;

    let message = format!(
        "no operator backed services found in namespace: {}",
        ctx.project()
    );
    expect_contains(&err, &message)?;
    match_all_in_output(
        &json_err,
        &[message.clone(), format!("\"message\": \"{message}\"")],
    )?;
    Ok(())
}

fn link_invalid_service_name(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    link_setup(ctx)?;
    ctx.pass(&ctx.odo(["create".to_string(), rand_string(6)]))?;

    for name in ["EtcdCluster", "EtcdCluster/", "/example"] {
        let err = ctx.fail(&ctx.odo(["link", name]))?;
        expect_contains(&err, "Invalid service name")?;
    }
    Ok(())
}

fn link_missing_service(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    link_setup(ctx)?;
    ctx.pass(&ctx.odo(["create".to_string(), rand_string(6)]))?;
    ctx.pass(&ctx.odo(["push"]))?;

    let err = ctx.fail(&ctx.odo(["link", EXAMPLE_SERVICE]))?;
    expect_contains(
        &err,
        &format!("Couldn't find service named \"{EXAMPLE_SERVICE}\""),
    )
}

/// Create a component, push it, start the example service and link them.
fn linked_component(ctx: &ScenarioContext, create_args: &[&str]) -> HarnessResult<String> {
    let component = rand_string(6);
    ctx.pass(&ctx.odo(
        ["create", component.as_str()]
            .into_iter()
            .chain(create_args.iter().copied()),
    ))?;
    ctx.pass(&ctx.odo(["push"]))?;

    let operator = etcd_operator(ctx)?;
    create_service(ctx, &operator, &[])?;
    wait_for_service_pod(ctx, "example")?;

    let out = ctx.pass(&ctx.odo(["link", EXAMPLE_SERVICE]))?;
    expect_contains(&out, "Successfully created link between component")?;
    ctx.pass(&ctx.odo(["push"]))?;
    Ok(component)
}

fn link_and_unlink(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    link_setup(ctx)?;
    linked_component(ctx, &["--devfile", DEVFILE, "--starter"])?;

    let err = ctx.fail(&ctx.odo(["link", EXAMPLE_SERVICE]))?;
    expect_contains(&err, "already linked with the service")?;

    let out = ctx.pass(&ctx.odo(["unlink", EXAMPLE_SERVICE]))?;
    expect_contains(&out, "Successfully unlinked component")?;
    ctx.pass(&ctx.odo(["push"]))?;

    let err = ctx.fail(&ctx.odo(["unlink", EXAMPLE_SERVICE]))?;
    expect_contains(&err, "failed to unlink the service")
}

fn binding_deleted_outside_odo(ctx: &mut ScenarioContext) -> HarnessResult<()> {
    link_setup(ctx)?;
    let component = linked_component(ctx, &[])?;

    let binding = format!("ServiceBinding/{component}-etcdcluster-example");
    ctx.pass(&ctx.oc(["delete", binding.as_str()]))?;

    let err = ctx.fail(&ctx.odo(["unlink", EXAMPLE_SERVICE]))?;
    match_all_in_output(&err, &["component's link with", "has been deleted outside odo"])?;
    Ok(())
}

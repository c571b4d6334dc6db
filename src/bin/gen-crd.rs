use kube::CustomResourceExt;
use versio::crd::deployment_config::DeploymentConfig;

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-crd | python3 -c "import sys,json,yaml; print(yaml.dump(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML
    let json_output = serde_json::to_string_pretty(&DeploymentConfig::crd())?;
    println!("{}", json_output);
    Ok(())
}

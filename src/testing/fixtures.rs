use crate::config::EngineConfig;
use crate::devfile::Devfile;
use crate::error::Result;
use std::path::Path;

/// One `runtime` container serving port 3000 with a default `npm start` run command
pub const NODEJS_DEVFILE: &str = r#"
schemaVersion: 2.0.0
metadata:
  name: nodejs
components:
  - name: runtime
    container:
      image: registry.access.redhat.com/ubi8/nodejs-12:1-36
      mountSources: true
      memoryLimit: 1024Mi
      endpoints:
        - name: http-3000
          targetPort: 3000
commands:
  - id: run
    exec:
      component: runtime
      commandLine: npm start
      workingDir: /projects
      group:
        kind: run
        isDefault: true
"#;

/// Two containers sharing one volume, with init, build, test, composite and
/// postStart commands
pub const FULL_DEVFILE: &str = r#"
schemaVersion: 2.0.0
metadata:
  name: java-springboot-
components:
  - name: tools
    container:
      image: quay.io/eclipse/che-java11-maven:nightly
      mountSources: true
      endpoints:
        - name: http-8080
          targetPort: 8080
      volumeMounts:
        - name: m2
          path: /home/user/.m2
  - name: sidecar
    container:
      image: busybox
      command: ["tail"]
      args: ["-f", "/dev/null"]
      volumeMounts:
        - name: m2
  - name: m2
    volume:
      size: 3Gi
commands:
  - id: Init
    exec:
      component: tools
      commandLine: mkdir -p /projects/.cache
      group:
        kind: init
  - id: build
    exec:
      component: tools
      commandLine: mvn -Dmaven.repo.local=/home/user/.m2/repository package
      workingDir: /projects
      group:
        kind: build
        isDefault: true
  - id: run
    exec:
      component: tools
      commandLine: java -jar target/app.jar
      workingDir: /projects
      hotReloadCapable: true
      group:
        kind: run
        isDefault: true
  - id: compile
    exec:
      component: tools
      commandLine: mvn compile
  - id: lint
    exec:
      component: tools
      commandLine: mvn checkstyle:check
  - id: unit
    exec:
      component: tools
      commandLine: mvn test
  - id: verify
    composite:
      commands: [compile, lint, unit]
      group:
        kind: test
        isDefault: true
  - id: connect-db
    exec:
      component: tools
      commandLine: ./scripts/wait-for-db.sh
events:
  postStart:
    - Connect-DB
"#;

pub fn devfile(yaml: &str) -> Result<Devfile> {
    Devfile::from_yaml(yaml)
}

/// Defaults with short waits, rooted at `context_dir`
pub fn test_config(context_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig {
        namespace: "dev".to_string(),
        application: "app".to_string(),
        context_dir: context_dir.to_path_buf(),
        ..Default::default()
    };
    config.timeouts.rollout_seconds = 5;
    config.timeouts.pod_seconds = 5;
    config.timeouts.build_seconds = 5;
    config.timeouts.poll_interval_ms = 10;
    config.timeouts.deploy_settle_ms = 0;
    config.registry.docker_config_path = Some(context_dir.join("docker-config.json"));
    config
}

/// Instrumentation profiles a trial can build with.
///
/// Each profile owns the `<profile>` fragment it injects into `pom.xml`, the
/// Maven profile id that activates it, and the capabilities that decide which
/// metric columns its rows carry.
use crate::error::HarnessError;

/// The closed set of build profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Full test run with no instrumentation.
    RetestAll,
    /// Regression test selection (Ekstazi).
    Ekstazi,
    /// Incremental coverage with test selection (iJaCoCo).
    IJacoco,
    /// Baseline coverage over the full test run (bJaCoCo).
    BJacoco,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::RetestAll,
        Profile::Ekstazi,
        Profile::IJacoco,
        Profile::BJacoco,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::RetestAll => "retestall",
            Profile::Ekstazi => "ekstazi",
            Profile::IJacoco => "ijacoco",
            Profile::BJacoco => "bjacoco",
        }
    }

    /// The Maven profile id, passed as `-P <id>` and used as the idempotence key.
    pub fn profile_id(&self) -> String {
        format!("{}p", self.as_str())
    }

    /// Whether builds under this profile emit a JaCoCo-style coverage table.
    pub fn supports_coverage(&self) -> bool {
        matches!(self, Profile::IJacoco | Profile::BJacoco)
    }

    /// Whether builds under this profile emit `<event>@<ns>` timing logs.
    pub fn supports_phase_timing(&self) -> bool {
        matches!(self, Profile::IJacoco)
    }

    /// Whether the build keeps selection state under `.ekstazi/`.
    pub fn keeps_selection_state(&self) -> bool {
        matches!(self, Profile::Ekstazi | Profile::IJacoco)
    }

    /// Coverage report directory relative to the working tree.
    pub fn coverage_dir(&self) -> String {
        format!("coverage-reports/{}-ut", self.as_str())
    }

    /// The `<profile>` element inserted under `project/profiles`.
    pub fn fragment(&self) -> String {
        match self {
            Profile::RetestAll => profile_xml(self, "", SUREFIRE_SINGLE_FORK),
            Profile::Ekstazi => profile_xml(self, EKSTAZI_PLUGIN, SUREFIRE_DEFAULT_FORK),
            Profile::IJacoco => profile_xml(
                self,
                &agent_plugin("org.ijacoco", "ijacoco", "1.0.0", true),
                SUREFIRE_SINGLE_FORK,
            ),
            Profile::BJacoco => profile_xml(
                self,
                &agent_plugin("org.bjacoco", "bjacoco", "0.8.6", false),
                SUREFIRE_REUSED_FORK,
            ),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = HarnessError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retestall" => Ok(Profile::RetestAll),
            "ekstazi" => Ok(Profile::Ekstazi),
            "ijacoco" => Ok(Profile::IJacoco),
            "bjacoco" => Ok(Profile::BJacoco),
            _ => Err(HarnessError::UnknownProfile(s.to_string())),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin that disables a project's own JaCoCo setup so it does not clash
/// with the instrumented profiles.
pub const SKIP_JACOCO_PLUGIN: &str = "<plugin>
          <groupId>org.jacoco</groupId>
          <artifactId>jacoco-maven-plugin</artifactId>
          <configuration>
            <skip>true</skip>
          </configuration>
        </plugin>";

const SUREFIRE_SINGLE_FORK: &str = "<plugin>
              <groupId>org.apache.maven.plugins</groupId>
              <artifactId>maven-surefire-plugin</artifactId>
              <version>2.22.0</version>
              <configuration>
                <testFailureIgnore>true</testFailureIgnore>
                <argLine>${surefireArgLine}</argLine>
                <forkMode>once</forkMode>
                <forkCount>1</forkCount>
                <reuseForks>true</reuseForks>
              </configuration>
            </plugin>";

const SUREFIRE_REUSED_FORK: &str = "<plugin>
              <groupId>org.apache.maven.plugins</groupId>
              <artifactId>maven-surefire-plugin</artifactId>
              <version>2.22.0</version>
              <configuration>
                <testFailureIgnore>true</testFailureIgnore>
                <argLine>${surefireArgLine}</argLine>
                <forkCount>1</forkCount>
                <reuseForks>true</reuseForks>
              </configuration>
            </plugin>";

const SUREFIRE_DEFAULT_FORK: &str = "<plugin>
              <groupId>org.apache.maven.plugins</groupId>
              <artifactId>maven-surefire-plugin</artifactId>
              <version>2.22.0</version>
              <configuration>
                <testFailureIgnore>true</testFailureIgnore>
                <argLine>${surefireArgLine}</argLine>
              </configuration>
            </plugin>";

const EKSTAZI_PLUGIN: &str = "<plugin>
              <groupId>org.ekstazi</groupId>
              <artifactId>ekstazi-maven-plugin</artifactId>
              <version>5.3.0</version>
              <executions>
                <execution>
                  <id>ekstazi</id>
                  <goals>
                    <goal>select</goal>
                  </goals>
                  <configuration>
                    <xargs>dependencies.format=txt</xargs>
                  </configuration>
                </execution>
              </executions>
            </plugin>";

/// Agent plugin shared by the two JaCoCo variants. The incremental variant
/// also binds its `select` goal.
fn agent_plugin(group: &str, tool: &str, version: &str, with_select: bool) -> String {
    let select = if with_select {
        "
                <execution>
                  <id>process-test-classes</id>
                  <goals>
                    <goal>select</goal>
                  </goals>
                </execution>"
    } else {
        ""
    };
    format!(
        "<plugin>
              <groupId>{group}</groupId>
              <artifactId>{tool}-maven-plugin</artifactId>
              <version>{version}</version>
              <executions>
                <execution>
                  <id>pre-unit-test</id>
                  <goals>
                    <goal>prepare-agent</goal>
                  </goals>
                  <configuration>
                    <append>false</append>
                    <mergeOnExit>true</mergeOnExit>
                    <dumpOnExit>true</dumpOnExit>
                    <destFile>${{project.basedir}}/coverage-reports/{tool}-ut.exec</destFile>
                    <propertyName>surefireArgLine</propertyName>
                  </configuration>
                </execution>{select}
                <execution>
                  <id>post-unit-test</id>
                  <phase>test</phase>
                  <goals>
                    <goal>report</goal>
                  </goals>
                  <configuration>
                    <dataFile>${{project.basedir}}/coverage-reports/{tool}-ut.exec</dataFile>
                    <outputDirectory>${{project.basedir}}/coverage-reports/{tool}-ut</outputDirectory>
                  </configuration>
                </execution>
              </executions>
            </plugin>"
    )
}

fn profile_xml(profile: &Profile, tool_plugin: &str, surefire: &str) -> String {
    let id = profile.profile_id();
    let plugins = if tool_plugin.is_empty() {
        surefire.to_string()
    } else {
        format!("{tool_plugin}\n            {surefire}")
    };
    format!(
        "<profile>
      <id>{id}</id>
      <activation>
        <property>
          <name>{id}</name>
        </property>
      </activation>
      <build>
        <plugins>
            {plugins}
        </plugins>
      </build>
    </profile>"
    )
}

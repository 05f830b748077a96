//! An ordered tor configuration and its textual forms.

use crate::err::ConfigError;
use crate::keyword::TorOption;
use crate::setting::{Argument, LineItem, RenderMode, Setting};

/// An ordered sequence of settings.
///
/// This is the unit handed to the generator, written to `LOADCONF`, and
/// rendered to command-line arguments.  Build one with
/// [`TorConfigBuilder`]; parse one back from torrc text with
/// [`TorConfig::parse`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TorConfig {
    /// The settings, in emission order.
    settings: Vec<Setting>,
}

impl TorConfig {
    /// Return a new empty builder.
    pub fn builder() -> TorConfigBuilder {
        TorConfigBuilder::default()
    }

    /// The settings, in emission order.
    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Mutable access for the generator's port-reassignment pass.
    pub(crate) fn settings_mut(&mut self) -> &mut Vec<Setting> {
        &mut self.settings
    }

    /// True if any setting is filed under `option`.
    pub fn contains(&self, option: TorOption) -> bool {
        self.settings.iter().any(|s| s.option() == option)
    }

    /// Render the whole config for `mode`.
    ///
    /// Torrc mode separates settings with newlines and ends with one;
    /// control mode produces one space-separated argument list suitable
    /// for a `SETCONF`.
    pub fn render(&self, mode: RenderMode) -> String {
        let sep = match mode {
            RenderMode::Torrc => "\n",
            RenderMode::ControlWire => " ",
        };
        let mut out = self
            .settings
            .iter()
            .map(|s| s.render(mode))
            .collect::<Vec<_>>()
            .join(sep);
        if mode == RenderMode::Torrc && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// The command-line argument vector for the settings whose keyword
    /// is a command-line argument: `--Keyword value` pairs, in order.
    pub fn cmdline_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        for setting in &self.settings {
            if !setting.option().attrs().cmd_line {
                continue;
            }
            for item in setting.items() {
                argv.push(format!("--{}", item.option));
                argv.push(item.render_value(RenderMode::Torrc));
            }
        }
        argv
    }

    /// Parse torrc-mode text back into a config.
    ///
    /// Settings come back with verbatim string arguments, so a parsed
    /// config re-renders to the text it was parsed from.  Blank lines
    /// and `#` comments are skipped; unrecognized keywords and
    /// out-of-place hidden-service lines are errors.
    pub fn parse(text: &str) -> Result<TorConfig, ConfigError> {
        let mut builder = TorConfigBuilder::default();
        // An open hidden-service block, gathering items until the next
        // non-HS keyword.
        let mut hs_items: Vec<LineItem> = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, rest) = match line.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest.trim()),
                None => (line, ""),
            };
            let option = TorOption::from_name(name)
                .ok_or_else(|| ConfigError::invalid(format!("unrecognized keyword {name:?}")))?;
            let item = LineItem::new(option, Argument::Value(rest.to_owned()));

            if option == TorOption::HiddenServiceDir {
                if !hs_items.is_empty() {
                    builder.push_parsed_block(std::mem::take(&mut hs_items));
                }
                hs_items.push(item);
            } else if option.attrs().hidden_service {
                if hs_items.is_empty() {
                    return Err(ConfigError::invalid_for(
                        option,
                        "hidden-service option outside a HiddenServiceDir block",
                    ));
                }
                hs_items.push(item);
            } else {
                if !hs_items.is_empty() {
                    builder.push_parsed_block(std::mem::take(&mut hs_items));
                }
                builder.push_parsed_block(vec![item]);
            }
        }
        if !hs_items.is_empty() {
            builder.push_parsed_block(hs_items);
        }
        Ok(builder.build())
    }
}

/// Builder for [`TorConfig`].
///
/// `put` is set-like on the leading keyword: configuring the same
/// keyword again replaces the earlier setting.  Hidden-service blocks
/// are the exception; each appends.
#[derive(Clone, Debug, Default)]
pub struct TorConfigBuilder {
    /// Accumulated settings.
    settings: Vec<Setting>,
}

impl TorConfigBuilder {
    /// Add `setting`, replacing any prior setting with the same leading
    /// keyword unless it is a hidden-service block.
    pub fn put(&mut self, setting: Setting) -> &mut Self {
        if !setting.is_hidden_service() {
            if let Some(existing) = self
                .settings
                .iter_mut()
                .find(|s| s.option() == setting.option())
            {
                *existing = setting;
                return self;
            }
        }
        self.settings.push(setting);
        self
    }

    /// Add a hidden-service block if it has any supported port.
    ///
    /// Returns whether anything was appended.
    pub fn put_hidden_service(&mut self, builder: crate::setting::HiddenServiceBuilder) -> bool {
        match builder.build() {
            Some(setting) => {
                self.settings.push(setting);
                true
            }
            None => false,
        }
    }

    /// True if a setting is filed under `option`.
    pub fn contains(&self, option: TorOption) -> bool {
        self.settings.iter().any(|s| s.option() == option)
    }

    /// Append already-parsed items verbatim (no replacement).
    fn push_parsed_block(&mut self, items: Vec<LineItem>) {
        self.settings.push(Setting::from_items(items, true));
    }

    /// Finish the config.
    pub fn build(self) -> TorConfig {
        TorConfig {
            settings: self.settings,
        }
    }
}

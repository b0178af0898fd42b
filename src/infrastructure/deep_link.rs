use crate::infrastructure::error::InfraError;
use std::process::Command;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    ChildDocument,
    Sql,
    IdList,
    DocBacklinks,
    DocBackmentions,
    OffspringDocument,
    BlockBacklinks,
    Js,
    DailyNote,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChildDocument => "ChildDocument",
            Self::Sql => "SQL",
            Self::IdList => "IdList",
            Self::DocBacklinks => "DocBacklinks",
            Self::DocBackmentions => "DocBackmentions",
            Self::OffspringDocument => "OffspringDocument",
            Self::BlockBacklinks => "BlockBacklinks",
            Self::Js => "JS",
            Self::DailyNote => "DailyNote",
        }
    }
}

impl FromStr for RuleType {
    type Err = InfraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ChildDocument" => Ok(Self::ChildDocument),
            "SQL" => Ok(Self::Sql),
            "IdList" => Ok(Self::IdList),
            "DocBacklinks" => Ok(Self::DocBacklinks),
            "DocBackmentions" => Ok(Self::DocBackmentions),
            "OffspringDocument" => Ok(Self::OffspringDocument),
            "BlockBacklinks" => Ok(Self::BlockBacklinks),
            "JS" => Ok(Self::Js),
            "DailyNote" => Ok(Self::DailyNote),
            other => Err(InfraError::InvalidConfig(format!(
                "unsupported viewer rule type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleInput {
    Text(String),
    Ids(Vec<String>),
}

fn preprocess_input(rule_type: RuleType, input: &RuleInput) -> Result<String, InfraError> {
    match (rule_type, input) {
        (RuleType::IdList, RuleInput::Ids(ids)) => Ok(ids.join(",")),
        (RuleType::IdList, RuleInput::Text(text)) => Ok(text
            .split(|ch: char| ch.is_whitespace() || ch == ',' || ch == '，')
            .filter(|id| !id.trim().is_empty())
            .collect::<Vec<_>>()
            .join(",")),
        (RuleType::Sql, RuleInput::Text(text)) => Ok(text.trim().to_string()),
        (RuleType::Js, RuleInput::Text(text)) => Ok(text.clone()),
        (RuleType::Sql | RuleType::Js, RuleInput::Ids(_)) => Err(InfraError::InvalidConfig(
            format!("{} rule input must be text", rule_type.as_str()),
        )),
        (_, RuleInput::Ids(ids)) => Ok(ids.first().cloned().unwrap_or_default()),
        (_, RuleInput::Text(text)) => Ok(text.clone()),
    }
}

/// `base?ruleType=..&ruleInput=..[&ruleTitle=..]`, form-encoded.
pub fn build_rule_url(
    base_url: &str,
    rule_type: RuleType,
    input: &RuleInput,
    title: Option<&str>,
) -> Result<String, InfraError> {
    let mut url = Url::parse(base_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid viewer url '{base_url}': {error}")))?;
    let rule_input = preprocess_input(rule_type, input)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("ruleType", rule_type.as_str());
        pairs.append_pair("ruleInput", &rule_input);
        if let Some(title) = title {
            pairs.append_pair("ruleTitle", title);
        }
    }
    Ok(url.to_string())
}

pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), InfraError>;
}

/// Hands URLs to the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
    fn open(&self, url: &str) -> Result<(), InfraError> {
        let mut command = if cfg!(target_os = "macos") {
            Command::new("open")
        } else if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", ""]);
            command
        } else {
            Command::new("xdg-open")
        };
        let status = command.arg(url).status()?;
        if status.success() {
            tracing::debug!(%url, "opened viewer link");
            Ok(())
        } else {
            Err(InfraError::InvalidConfig(format!(
                "url opener exited with status {status}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::DEFAULT_VIEWER_BASE_URL;

    fn query_pairs(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .expect("valid url")
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    #[test]
    fn sql_rule_is_trimmed_and_encoded() {
        let url = build_rule_url(
            DEFAULT_VIEWER_BASE_URL,
            RuleType::Sql,
            &RuleInput::Text("  SELECT * FROM blocks WHERE content LIKE '%a&b%' ".to_string()),
            Some("My group"),
        )
        .expect("url");

        assert!(url.starts_with("siyuan://plugins/sy-docs-flow/open-rule?ruleType=SQL&ruleInput="));
        assert!(!url.contains("a&b"));
        assert_eq!(
            query_pairs(&url),
            vec![
                ("ruleType".to_string(), "SQL".to_string()),
                (
                    "ruleInput".to_string(),
                    "SELECT * FROM blocks WHERE content LIKE '%a&b%'".to_string()
                ),
                ("ruleTitle".to_string(), "My group".to_string()),
            ]
        );
    }

    #[test]
    fn id_list_joins_with_commas() {
        let url = build_rule_url(
            DEFAULT_VIEWER_BASE_URL,
            RuleType::IdList,
            &RuleInput::Ids(vec!["a".to_string(), "b".to_string()]),
            None,
        )
        .expect("url");

        assert_eq!(
            query_pairs(&url),
            vec![
                ("ruleType".to_string(), "IdList".to_string()),
                ("ruleInput".to_string(), "a,b".to_string()),
            ]
        );
    }

    #[test]
    fn id_list_text_splits_on_mixed_separators() {
        let processed = preprocess_input(
            RuleType::IdList,
            &RuleInput::Text("a, b\nc，d,,".to_string()),
        )
        .expect("processed");
        assert_eq!(processed, "a,b,c,d");
    }

    #[test]
    fn single_id_rules_take_first_id() {
        let processed = preprocess_input(
            RuleType::ChildDocument,
            &RuleInput::Ids(vec!["doc-1".to_string(), "doc-2".to_string()]),
        )
        .expect("processed");
        assert_eq!(processed, "doc-1");
    }

    #[test]
    fn unsupported_rule_type_is_rejected() {
        assert!(matches!(
            "Bogus".parse::<RuleType>(),
            Err(InfraError::InvalidConfig(_))
        ));
        assert_eq!("DailyNote".parse::<RuleType>().expect("parse"), RuleType::DailyNote);
    }

    #[test]
    fn sql_rule_rejects_id_input() {
        assert!(preprocess_input(RuleType::Sql, &RuleInput::Ids(vec!["a".to_string()])).is_err());
    }
}

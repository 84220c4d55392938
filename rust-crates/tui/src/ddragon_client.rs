use crate::http::fetch_bytes;
use anyhow::{
    Context,
    Result,
    ensure,
};
use roller::{
    Entry,
    Roster,
    VersionTag,
    ports::{
        ImageLoader,
        RosterProvider,
    },
};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_DDRAGON_URL: &str = "https://ddragon.leagueoflegends.com";
pub const DEFAULT_LOCALE: &str = "en_US";

/// Data Dragon static-data client. Serves both the roster and the champion
/// icons for a given catalog version.
#[derive(Clone)]
pub struct DataDragonClient {
    base_url: String,
    locale: String,
    http: reqwest::Client,
}

impl DataDragonClient {
    pub fn new(
        base_url: impl Into<String>,
        locale: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            locale: locale.into(),
            http,
        }
    }

    pub fn image_url(&self, version: &VersionTag, entry: &Entry) -> String {
        format!(
            "{}/cdn/{}/img/champion/{}",
            self.base_url, version, entry.image
        )
    }

    fn versions_url(&self) -> String {
        format!("{}/api/versions.json", self.base_url)
    }

    fn roster_url(&self, version: &VersionTag) -> String {
        format!(
            "{}/cdn/{}/data/{}/champion.json",
            self.base_url, version, self.locale
        )
    }
}

impl RosterProvider for DataDragonClient {
    async fn get_latest_version(&self) -> Result<VersionTag> {
        let bytes = fetch_bytes(&self.http, &self.versions_url(), "version list").await?;
        parse_versions(&bytes)
    }

    async fn get_roster(&self, version: &VersionTag) -> Result<Roster> {
        let bytes =
            fetch_bytes(&self.http, &self.roster_url(version), "champion list").await?;
        parse_roster(version, &bytes)
    }
}

impl ImageLoader for DataDragonClient {
    async fn load(&self, version: &VersionTag, entry: &Entry) -> Result<()> {
        let url = self.image_url(version, entry);
        let bytes = fetch_bytes(&self.http, &url, "champion image").await?;
        ensure!(!bytes.is_empty(), "empty image body from {url}");
        Ok(())
    }
}

/// First element of the version list is the latest release.
pub fn parse_versions(bytes: &[u8]) -> Result<VersionTag> {
    let versions: Vec<String> =
        serde_json::from_slice(bytes).context("invalid version list payload")?;
    let latest = versions
        .into_iter()
        .next()
        .context("version list is empty")?;
    Ok(VersionTag::new(latest))
}

pub fn parse_roster(version: &VersionTag, bytes: &[u8]) -> Result<Roster> {
    let dto: ChampionListDto =
        serde_json::from_slice(bytes).context("invalid champion list payload")?;
    ensure!(!dto.data.is_empty(), "champion list for {version} is empty");
    Ok(Roster::new(
        version.clone(),
        dto.data.into_values().map(Into::into),
    ))
}

#[derive(Deserialize)]
struct ChampionListDto {
    data: HashMap<String, ChampionDto>,
}

#[derive(Deserialize)]
struct ChampionDto {
    id: String,
    name: String,
    image: ImageDto,
}

#[derive(Deserialize)]
struct ImageDto {
    full: String,
}

impl From<ChampionDto> for Entry {
    fn from(dto: ChampionDto) -> Self {
        Entry::new(dto.id, dto.name, dto.image.full)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    const CHAMPIONS: &str = r#"{
        "type": "champion",
        "format": "standAloneComplex",
        "version": "14.20.1",
        "data": {
            "MonkeyKing": {
                "id": "MonkeyKing",
                "key": "62",
                "name": "Wukong",
                "image": { "full": "MonkeyKing.png", "sprite": "champion2.png" }
            },
            "Ahri": {
                "id": "Ahri",
                "key": "103",
                "name": "Ahri",
                "image": { "full": "Ahri.png", "sprite": "champion0.png" }
            }
        }
    }"#;

    #[test]
    fn parse_versions__takes_first_entry() {
        // given
        let body = br#"["14.20.1", "14.19.1", "lolpatch_3.7"]"#;

        // when
        let version = parse_versions(body).unwrap();

        // then
        assert_eq!(version.as_str(), "14.20.1");
    }

    #[test]
    fn parse_versions__rejects_empty_list() {
        assert!(parse_versions(b"[]").is_err());
        assert!(parse_versions(b"<html>").is_err());
    }

    #[test]
    fn parse_roster__maps_champions_to_entries_in_id_order() {
        // given
        let version = VersionTag::new("14.20.1");

        // when
        let roster = parse_roster(&version, CHAMPIONS.as_bytes()).unwrap();

        // then
        let entries: Vec<&Entry> = roster.iter().collect();
        assert_eq!(
            entries,
            vec![
                &Entry::new("Ahri", "Ahri", "Ahri.png"),
                &Entry::new("MonkeyKing", "Wukong", "MonkeyKing.png"),
            ]
        );
        assert_eq!(roster.version(), &version);
    }

    #[test]
    fn parse_roster__rejects_missing_data() {
        let version = VersionTag::new("14.20.1");

        assert!(parse_roster(&version, br#"{"data": {}}"#).is_err());
        assert!(parse_roster(&version, br#"{"type": "champion"}"#).is_err());
    }

    #[test]
    fn urls__follow_cdn_layout() {
        // given
        let client = DataDragonClient::new(
            "https://ddragon.example/",
            "ko_KR",
            reqwest::Client::new(),
        );
        let version = VersionTag::new("14.20.1");
        let ahri = Entry::new("Ahri", "Ahri", "Ahri.png");

        // then
        assert_eq!(
            client.versions_url(),
            "https://ddragon.example/api/versions.json"
        );
        assert_eq!(
            client.roster_url(&version),
            "https://ddragon.example/cdn/14.20.1/data/ko_KR/champion.json"
        );
        assert_eq!(
            client.image_url(&version, &ahri),
            "https://ddragon.example/cdn/14.20.1/img/champion/Ahri.png"
        );
    }
}

//! Static lookup tables: localized country and organization names, and the
//! regional internet registry responsible for a country.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Output language for localized names.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// Provider spelling, untouched.
    #[default]
    Raw,
    /// Japanese country names and ISP brand names.
    #[serde(rename = "ja")]
    Japanese,
}

/// Regional internet registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rir {
    Arin,
    Ripe,
    Apnic,
    Jpnic,
    Afrinic,
    Lacnic,
}

impl Rir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rir::Arin => "ARIN",
            Rir::Ripe => "RIPE",
            Rir::Apnic => "APNIC",
            Rir::Jpnic => "JPNIC",
            Rir::Afrinic => "AFRINIC",
            Rir::Lacnic => "LACNIC",
        }
    }
}

impl fmt::Display for Rir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const COUNTRY_RIR: &[(&str, Rir)] = &[
    ("JP", Rir::Jpnic),
    ("CN", Rir::Apnic), ("AU", Rir::Apnic), ("KR", Rir::Apnic), ("IN", Rir::Apnic),
    ("ID", Rir::Apnic), ("MY", Rir::Apnic), ("NZ", Rir::Apnic), ("SG", Rir::Apnic),
    ("TH", Rir::Apnic), ("VN", Rir::Apnic), ("PH", Rir::Apnic), ("PK", Rir::Apnic),
    ("BD", Rir::Apnic), ("HK", Rir::Apnic), ("TW", Rir::Apnic), ("NP", Rir::Apnic),
    ("LK", Rir::Apnic), ("MO", Rir::Apnic),
    ("US", Rir::Arin), ("CA", Rir::Arin),
    ("ZA", Rir::Afrinic), ("EG", Rir::Afrinic), ("NG", Rir::Afrinic), ("KE", Rir::Afrinic),
    ("DZ", Rir::Afrinic), ("MA", Rir::Afrinic), ("GH", Rir::Afrinic), ("CM", Rir::Afrinic),
    ("TN", Rir::Afrinic), ("ET", Rir::Afrinic), ("TZ", Rir::Afrinic),
    ("DE", Rir::Ripe), ("FR", Rir::Ripe), ("GB", Rir::Ripe), ("RU", Rir::Ripe),
    ("NL", Rir::Ripe), ("IT", Rir::Ripe), ("ES", Rir::Ripe), ("PL", Rir::Ripe),
    ("TR", Rir::Ripe), ("UA", Rir::Ripe), ("SA", Rir::Ripe), ("IR", Rir::Ripe),
    ("CH", Rir::Ripe), ("SE", Rir::Ripe), ("NO", Rir::Ripe), ("DK", Rir::Ripe),
    ("BE", Rir::Ripe), ("AT", Rir::Ripe), ("GR", Rir::Ripe), ("PT", Rir::Ripe),
    ("IE", Rir::Ripe), ("FI", Rir::Ripe), ("CZ", Rir::Ripe), ("RO", Rir::Ripe),
    ("HU", Rir::Ripe), ("IL", Rir::Ripe), ("KZ", Rir::Ripe), ("BG", Rir::Ripe),
    ("HR", Rir::Ripe), ("RS", Rir::Ripe), ("AE", Rir::Ripe), ("QA", Rir::Ripe),
    ("BR", Rir::Lacnic), ("AR", Rir::Lacnic), ("MX", Rir::Lacnic), ("CL", Rir::Lacnic),
    ("CO", Rir::Lacnic), ("PE", Rir::Lacnic), ("VE", Rir::Lacnic), ("EC", Rir::Lacnic),
    ("UY", Rir::Lacnic), ("PY", Rir::Lacnic), ("BO", Rir::Lacnic), ("CR", Rir::Lacnic),
    ("PA", Rir::Lacnic),
];

const COUNTRY_JA: &[(&str, &str)] = &[
    ("AF", "アフガニスタン"), ("AL", "アルバニア"), ("DZ", "アルジェリア"), ("AS", "アメリカ領サモア"),
    ("AD", "アンドラ"), ("AO", "アンゴラ"), ("AI", "アンギラ"), ("AQ", "南極"),
    ("AG", "アンティグア・バーブーダ"), ("AR", "アルゼンチン"), ("AM", "アルメニア"), ("AW", "アルバ"),
    ("AU", "オーストラリア"), ("AT", "オーストリア"), ("AZ", "アゼルバイジャン"), ("BS", "バハマ"),
    ("BH", "バーレーン"), ("BD", "バングラデシュ"), ("BB", "バルバドス"), ("BY", "ベラルーシ"),
    ("BE", "ベルギー"), ("BZ", "ベリーズ"), ("BJ", "ベナン"), ("BM", "バミューダ"),
    ("BT", "ブータン"), ("BO", "ボリビア"), ("BA", "ボスニア・ヘルツェゴビナ"), ("BW", "ボツワナ"),
    ("BR", "ブラジル"), ("BN", "ブルネイ"), ("BG", "ブルガリア"), ("BF", "ブルキナファソ"),
    ("BI", "ブルンジ"), ("KH", "カンボジア"), ("CM", "カメルーン"), ("CA", "カナダ"),
    ("CV", "カーボベルデ"), ("CF", "中央アフリカ共和国"), ("TD", "チャド"), ("CL", "チリ"),
    ("CN", "中国"), ("CO", "コロンビア"), ("CR", "コスタリカ"), ("HR", "クロアチア"),
    ("CU", "キューバ"), ("CY", "キプロス"), ("CZ", "チェコ"), ("DK", "デンマーク"),
    ("DJ", "ジブチ"), ("DM", "ドミニカ国"), ("DO", "ドミニカ共和国"), ("EC", "エクアドル"),
    ("EG", "エジプト"), ("SV", "エルサルバドル"), ("EE", "エストニア"), ("ET", "エチオピア"),
    ("FI", "フィンランド"), ("FR", "フランス"), ("DE", "ドイツ"), ("GR", "ギリシャ"),
    ("GL", "グリーンランド"), ("GT", "グアテマラ"), ("GY", "ガイアナ"), ("HK", "香港"),
    ("HU", "ハンガリー"), ("IN", "インド"), ("ID", "インドネシア"), ("IR", "イラン"),
    ("IQ", "イラク"), ("IE", "アイルランド"), ("IL", "イスラエル"), ("IT", "イタリア"),
    ("JP", "日本"), ("KR", "韓国"), ("TW", "台湾"), ("MY", "マレーシア"),
    ("MX", "メキシコ"), ("NL", "オランダ"), ("NZ", "ニュージーランド"), ("NO", "ノルウェー"),
    ("PK", "パキスタン"), ("PA", "パナマ"), ("PE", "ペルー"), ("PH", "フィリピン"),
    ("PL", "ポーランド"), ("PT", "ポルトガル"), ("QA", "カタール"), ("RO", "ルーマニア"),
    ("RU", "ロシア"), ("SA", "サウジアラビア"), ("SG", "シンガポール"), ("ZA", "南アフリカ"),
    ("ES", "スペイン"), ("SE", "スウェーデン"), ("CH", "スイス"), ("TH", "タイ"),
    ("TR", "トルコ"), ("UA", "ウクライナ"), ("AE", "アラブ首長国連邦"), ("GB", "イギリス"),
    ("US", "アメリカ"), ("VN", "ベトナム"), ("YE", "イエメン"), ("ZM", "ザンビア"),
    ("ZW", "ジンバブエ"),
];

/// Japanese brand names for common ISPs, keyed by provider spelling.
const ISP_JA: &[(&str, &str)] = &[
    ("NTT Communications Corporation", "NTTドコモビジネス"),
    ("NTT DOCOMO BUSINESS,Inc.", "NTTドコモビジネス"),
    ("NTT DOCOMO, INC.", "NTTドコモ"),
    ("NTT PC Communications, Inc.", "NTTPCコミュニケーションズ"),
    ("Kddi Corporation", "KDDI"),
    ("Chubu Telecommunications Co., Inc.", "中部テレコミュニケーション"),
    ("Chubu Telecommunications Company, Inc.", "中部テレコミュニケーション"),
    ("Hokkaido Telecommunication Network Co., Inc.", "HOTnet"),
    ("Energia Communications, Inc.", "エネコム"),
    ("STNet, Inc.", "STNet"),
    ("QTNet, Inc.", "QTNet"),
    ("BIGLOBE Inc.", "ビッグローブ"),
    ("SoftBank Corp.", "ソフトバンク"),
    ("Yahoo Japan Corporation", "LINEヤフー"),
    ("LY Corporation", "LINEヤフー"),
    ("LINE Corporation", "LINEヤフー"),
    ("Rakuten Group, Inc.", "楽天グループ"),
    ("Rakuten Mobile, Inc.", "楽天モバイル"),
    ("Rakuten Communications Corp.", "楽天コミュニケーションズ"),
    ("Sony Network Communications Inc.", "ソニーネットワークコミュニケーションズ"),
    ("So-net Entertainment Corporation", "ソニーネットワークコミュニケーションズ"),
    ("So-net Corporation", "ソニーネットワークコミュニケーションズ"),
    ("Internet Initiative Japan Inc.", "IIJ"),
    ("NIFTY Corporation", "ニフティ"),
    ("FreeBit Co., Ltd.", "フリービット"),
    ("TOKAI Communications Corporation", "TOKAIコミュニケーションズ"),
    ("DREAM TRAIN INTERNET INC.", "ドリーム・トレイン・インターネット (DTI)"),
    ("ASAHI Net, Inc.", "朝日ネット"),
    ("Asahi Net", "朝日ネット"),
    ("Optage Inc.", "オプテージ"),
    ("Jupiter Telecommunications Co., Ltd.", "J:COM"),
    ("JCOM Co., Ltd.", "J:COM"),
    ("JCN", "J:COM"),
    ("SAKURA Internet Inc.", "さくらインターネット"),
    ("GMO Internet, Inc.", "GMOインターネット"),
    ("INTERNET MULTIFEED CO.", "インターネットマルチフィード"),
    ("IDC Frontier Inc.", "IDCフロンティア"),
    ("ARTERIA Networks Corporation", "アルテリア・ネットワークス"),
    ("UCOM Corporation", "アルテリア・ネットワークス"),
    ("VECTANT Ltd.", "アルテリア・ネットワークス"),
    ("KIBI Cable Television Co., Ltd.", "吉備ケーブルテレビ"),
];

/// Lowercase, drop commas and periods, trim.
///
/// Used to compare organization names that differ only in spelling noise
/// (`"NTT DOCOMO, INC."` vs `"ntt docomo inc"`).
pub fn normalize_org(name: &str) -> String {
    name.to_lowercase()
        .replace([',', '.'], "")
        .trim()
        .to_string()
}

fn isp_table() -> &'static HashMap<String, &'static str> {
    static TABLE: OnceLock<HashMap<String, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        ISP_JA
            .iter()
            .map(|(en, ja)| (normalize_org(en), *ja))
            .collect()
    })
}

/// RIR responsible for a country code.
pub fn regional_registry(country_code: &str) -> Option<Rir> {
    COUNTRY_RIR
        .iter()
        .find(|(cc, _)| cc.eq_ignore_ascii_case(country_code))
        .map(|(_, rir)| *rir)
}

impl Locale {
    /// Localized organization name; unknown names come back unchanged.
    pub fn organization(&self, name: &str) -> String {
        match self {
            Locale::Raw => name.to_string(),
            Locale::Japanese => isp_table()
                .get(&normalize_org(name))
                .map(|ja| ja.to_string())
                .unwrap_or_else(|| name.to_string()),
        }
    }

    /// Localized country name from the table, if this locale has one.
    pub fn country(&self, country_code: &str) -> Option<&'static str> {
        match self {
            Locale::Raw => None,
            Locale::Japanese => COUNTRY_JA
                .iter()
                .find(|(cc, _)| cc.eq_ignore_ascii_case(country_code))
                .map(|(_, name)| *name),
        }
    }
}

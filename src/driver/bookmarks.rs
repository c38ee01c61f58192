//! 북마크 관리
//!
//! 세션이 관찰한 인과적 일관성 북마크를 관리합니다. 시스템 데이터베이스
//! 북마크는 사용자 데이터베이스 북마크와 분리된 네임스페이스에 보관되며,
//! 사용자 데이터베이스의 인과 체인에 섞이지 않습니다.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// 시스템 데이터베이스 이름
pub const SYSTEM_DATABASE: &str = "system";

// ============================================================================
// Bookmark - 북마크
// ============================================================================

/// 인과적 일관성 북마크
///
/// 값은 불투명 문자열이며, 동등성은 값으로만 판단합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    /// 북마크 값
    value: String,
    /// 북마크가 속한 데이터베이스 (None이면 세션 대상 데이터베이스)
    database: Option<String>,
}

impl Bookmark {
    /// 새 북마크 생성
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            database: None,
        }
    }

    /// 데이터베이스를 지정한 북마크 생성
    pub fn for_database(value: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            database: Some(database.into()),
        }
    }

    /// 시스템 데이터베이스 북마크 생성
    pub fn system(value: impl Into<String>) -> Self {
        Self::for_database(value, SYSTEM_DATABASE)
    }

    /// 북마크 값
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 소속 데이터베이스
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// 빈 북마크 여부
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Bookmark {}

impl Hash for Bookmark {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// BookmarkManager - 북마크 관리자
// ============================================================================

/// 세션별 북마크 관리자
///
/// 스냅샷은 삽입 순서를 유지합니다.
#[derive(Debug, Clone, Default)]
pub struct BookmarkManager {
    /// 세션 대상 데이터베이스 ("" = 기본 데이터베이스)
    target: String,
    /// 사용자 데이터베이스 네임스페이스
    user: Vec<Bookmark>,
    /// 시스템 데이터베이스 네임스페이스
    system: Vec<Bookmark>,
}

impl BookmarkManager {
    /// 새 관리자 생성
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            user: Vec::new(),
            system: Vec::new(),
        }
    }

    /// 초기 북마크와 함께 생성
    pub fn with_bookmarks<I>(target: impl Into<String>, bookmarks: I) -> Self
    where
        I: IntoIterator<Item = Bookmark>,
    {
        let mut manager = Self::new(target);
        manager.merge(bookmarks);
        manager
    }

    /// 대상 데이터베이스
    pub fn target(&self) -> &str {
        &self.target
    }

    fn targets_system(&self) -> bool {
        self.target == SYSTEM_DATABASE
    }

    fn is_system(&self, bookmark: &Bookmark) -> bool {
        bookmark.database().unwrap_or(&self.target) == SYSTEM_DATABASE
    }

    /// 데이터베이스 태그가 없으면 어느 데이터베이스에나 속함
    fn belongs_to(bookmark: &Bookmark, database: &str) -> bool {
        bookmark.database().map_or(true, |db| db == database)
    }

    /// 북마크 병합 (값 기준 합집합)
    pub fn merge<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = Bookmark>,
    {
        for bookmark in incoming {
            if bookmark.is_empty() {
                continue;
            }
            let namespace = if self.is_system(&bookmark) {
                &mut self.system
            } else {
                &mut self.user
            };
            if !namespace.contains(&bookmark) {
                namespace.push(bookmark);
            }
        }
    }

    /// 서버가 돌려준 북마크로 대상 데이터베이스의 북마크 교체
    ///
    /// 새 북마크는 대상 데이터베이스의 이전 북마크를 대체하고, 다른
    /// 데이터베이스로 태그된 북마크는 남깁니다. `None`이면 변경하지 않습니다.
    pub fn update_from_server(&mut self, bookmark: Option<String>) {
        let Some(value) = bookmark.filter(|b| !b.is_empty()) else {
            return;
        };

        let target = self.target.clone();
        let bookmark = Bookmark::for_database(value, target.clone());
        let namespace = if self.targets_system() {
            &mut self.system
        } else {
            &mut self.user
        };
        namespace.retain(|b| !Self::belongs_to(b, &target));
        namespace.push(bookmark);
    }

    /// 대상 데이터베이스의 북마크
    pub fn snapshot(&self) -> Vec<Bookmark> {
        let namespace = if self.targets_system() {
            &self.system
        } else {
            &self.user
        };
        namespace
            .iter()
            .filter(|b| Self::belongs_to(b, &self.target))
            .cloned()
            .collect()
    }

    /// 시스템 데이터베이스 북마크
    pub fn system_snapshot(&self) -> Vec<Bookmark> {
        self.system.clone()
    }

    /// 데이터베이스로 보낼 북마크 값
    ///
    /// 시스템 데이터베이스 요청에는 시스템 북마크만, 그 밖의 요청에는 해당
    /// 데이터베이스로 태그되었거나 태그가 없는 사용자 북마크만 첨부됩니다.
    pub fn values_for(&self, database: &str) -> Vec<String> {
        let namespace = if database == SYSTEM_DATABASE {
            &self.system
        } else {
            &self.user
        };
        namespace
            .iter()
            .filter(|b| Self::belongs_to(b, database))
            .map(|b| b.value().to_string())
            .collect()
    }

    /// 대상 데이터베이스로 보낼 북마크 값
    pub fn values(&self) -> Vec<String> {
        self.values_for(&self.target)
    }
}

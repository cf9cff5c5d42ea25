use async_trait::async_trait;
use chrono::Utc;

use super::HotTopicFetcher;
use crate::config::HotTopicConfig;
use crate::storage::{FeedItem, SourceKind};

const SOURCE_NAME: &str = "小红书";

pub const CATEGORIES: [&str; 4] = ["design", "tech", "product", "ai"];

struct Note {
    category: &'static str,
    title: &'static str,
    summary: &'static str,
    author: &'static str,
    likes: &'static str,
    tags: [&'static str; 3],
}

const NOTES: [Note; 12] = [
    Note {
        category: "design",
        title: "2024年UI设计趋势大揭秘",
        summary: "盘点今年最流行的设计风格，从新拟态到玻璃态，从暗黑模式到极简主义，带你了解最新设计趋势。",
        author: "设计小站",
        likes: "1.2w",
        tags: ["UI设计", "设计趋势", "2024"],
    },
    Note {
        category: "design",
        title: "Figma高阶技巧分享",
        summary: "5个Figma隐藏技巧，让你的设计效率提升10倍！自动布局、组件变体、原型交互全解析。",
        author: "Figma大神",
        likes: "8563",
        tags: ["Figma", "设计工具", "教程"],
    },
    Note {
        category: "design",
        title: "如何设计一个好的产品logo",
        summary: "从品牌定位到视觉呈现，完整logo设计流程分享。附：10个优秀logo案例分析。",
        author: "品牌设计笔记",
        likes: "6532",
        tags: ["logo设计", "品牌设计", "案例"],
    },
    Note {
        category: "tech",
        title: "AI辅助编程实战经验",
        summary: "使用AI编程助手进行开发的最佳实践，提示词技巧和常见问题解决方案。",
        author: "编程达人",
        likes: "2.3w",
        tags: ["AI", "编程", "开发工具"],
    },
    Note {
        category: "tech",
        title: "Next.js 14新特性详解",
        summary: "Server Actions、Turbopack、Partial Prerendering等新特性完整指南，附实战项目案例。",
        author: "前端技术栈",
        likes: "1.1w",
        tags: ["Next.js", "React", "前端"],
    },
    Note {
        category: "tech",
        title: "数据库优化实战指南",
        summary: "从索引优化到查询优化，从分库分表到读写分离，完整的数据库性能优化方案。",
        author: "后端架构",
        likes: "7823",
        tags: ["数据库", "性能优化", "架构"],
    },
    Note {
        category: "product",
        title: "如何写出一份完美的PRD",
        summary: "从需求分析到功能设计，从用户故事到验收标准，手把手教你写出高质量的PRD文档。",
        author: "产品经理笔记",
        likes: "3.5w",
        tags: ["PRD", "产品文档", "需求"],
    },
    Note {
        category: "product",
        title: "用户体验设计的5个核心原则",
        summary: "以用户为中心的设计思维，从可用性到愉悦感，打造超预期的用户体验。",
        author: "UX设计说",
        likes: "1.8w",
        tags: ["UX", "用户体验", "设计"],
    },
    Note {
        category: "product",
        title: "产品经理必会的数据分析方法",
        summary: "A/B测试、漏斗分析、用户分层，数据驱动产品决策的完整方法论。",
        author: "数据产品",
        likes: "9234",
        tags: ["数据分析", "产品经理", "增长"],
    },
    Note {
        category: "ai",
        title: "大模型完全评测",
        summary: "对比主流大模型在代码生成、写作、推理等方面的表现，真实使用体验分享。",
        author: "AI工具评测",
        likes: "4.2w",
        tags: ["大模型", "AI", "LLM"],
    },
    Note {
        category: "ai",
        title: "AI绘画提示词大全",
        summary: "Midjourney、Stable Diffusion提示词技巧，从风格描述到参数设置，创作高质量AI绘画。",
        author: "AI绘画实验室",
        likes: "2.7w",
        tags: ["AI绘画", "Midjourney", "提示词"],
    },
    Note {
        category: "ai",
        title: "个人AI助理搭建指南",
        summary: "使用LangChain、向量数据库搭建个人知识库AI助手，让你的信息管理更高效。",
        author: "AI实践者",
        likes: "1.5w",
        tags: ["AI助手", "LangChain", "知识库"],
    },
];

/// Xiaohongshu has no public endpoint; this serves a fixed list of notes.
pub struct Xiaohongshu {
    limit: usize,
}

impl Xiaohongshu {
    pub fn new(config: &HotTopicConfig) -> Self {
        Self {
            limit: config.xiaohongshu_limit,
        }
    }
}

/// Notes for `category`: one of [`CATEGORIES`], or all of them for `None`,
/// `"all"` or an unknown name.
pub(crate) fn mock_items(limit: usize, category: Option<&str>) -> Vec<FeedItem> {
    let wanted = category
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| CATEGORIES.contains(&c.as_str()));
    if let Some(unknown) = category.filter(|c| wanted.is_none() && !c.eq_ignore_ascii_case("all")) {
        tracing::warn!(category = %unknown, "Unknown Xiaohongshu category, serving all");
    }

    let now = Utc::now();
    NOTES
        .iter()
        .filter(|note| wanted.as_deref().map_or(true, |c| note.category == c))
        .take(limit)
        .map(|note| FeedItem {
            title: format!("🔥 {} • {}", note.likes, note.title),
            link: Some(format!(
                "https://www.xiaohongshu.com/search_result?keyword={}",
                urlencoding::encode(note.title)
            )),
            publish_time: now,
            summary: format!("{} 作者: {}", note.summary, note.author),
            tags: std::iter::once(SOURCE_NAME)
                .chain(note.tags)
                .map(str::to_string)
                .collect(),
            source_name: SOURCE_NAME.to_string(),
            favicon_url: None,
        })
        .collect()
}

#[async_trait]
impl HotTopicFetcher for Xiaohongshu {
    fn kind(&self) -> SourceKind {
        SourceKind::Xiaohongshu
    }

    fn default_limit(&self) -> usize {
        self.limit
    }

    async fn fetch(&self, limit: usize, category: Option<&str>) -> Vec<FeedItem> {
        mock_items(limit, category)
    }
}

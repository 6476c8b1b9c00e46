use super::fingerprint::UserAgentProfile;
use scout_common::StealthLevel;

/// Construct Chrome command-line arguments for a stealth level and
/// fingerprint.
pub fn build_stealth_arguments(
    level: StealthLevel,
    user_profile: &UserAgentProfile,
    headless: bool,
) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        format!("--user-agent={}", user_profile.user_agent),
        format!(
            "--window-size={},{}",
            user_profile.viewport.0, user_profile.viewport.1
        ),
    ];
    if level != StealthLevel::Lightweight {
        args.push("--disable-extensions".to_string());
        args.push("--disable-plugins-discovery".to_string());
        args.push(format!("--lang={}", user_profile.languages.join(",")));
    }
    if headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    } else if level == StealthLevel::Maximum {
        args.push("--disable-gpu".to_string());
    }
    args
}

/// JavaScript evasions applied after each page load.
pub struct StealthScripts;

impl StealthScripts {
    pub fn get_core_evasions() -> &'static str {
        r#"
            Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
            Object.defineProperty(navigator, 'plugins', { get: () => [1,2,3] });
            Object.defineProperty(navigator, 'languages', {
                get: () => ['en-US', 'en']
            });
            if (!window.chrome) window.chrome = { runtime: {} };
        "#
    }

    pub fn get_webgl_evasions() -> &'static str {
        r#"
            const getParameter = WebGLRenderingContext.prototype.getParameter;
            WebGLRenderingContext.prototype.getParameter = function(parameter) {
                if (parameter === 37445) return 'Intel Inc.';
                if (parameter === 37446) return 'Intel Iris OpenGL Engine';
                return getParameter.call(this, parameter);
            };
        "#
    }

    pub fn get_canvas_evasions() -> &'static str {
        r#"
            const getContext = HTMLCanvasElement.prototype.getContext;
            HTMLCanvasElement.prototype.getContext = function(type,...args){
                const ctx = getContext.call(this,type,...args);
                if(type==='2d' && ctx) {
                    const origToDataURL=this.toDataURL;
                    this.toDataURL=function(...a){
                        const imgdata=ctx.getImageData(0,0,this.width,this.height);
                        for(let i=0;i<imgdata.data.length;i+=4){
                            if(Math.random()<0.001)imgdata.data[i]+=Math.random()<0.5?-1:1;
                        }
                        ctx.putImageData(imgdata,0,0);
                        return origToDataURL.call(this,...a);
                    };
                }
                return ctx;
            };
        "#
    }

    /// Scripts to run for a level, in order.
    pub fn for_level(level: StealthLevel) -> Vec<&'static str> {
        match level {
            StealthLevel::Lightweight => vec![Self::get_core_evasions()],
            StealthLevel::Balanced => vec![Self::get_core_evasions(), Self::get_canvas_evasions()],
            StealthLevel::Maximum => vec![
                Self::get_core_evasions(),
                Self::get_canvas_evasions(),
                Self::get_webgl_evasions(),
            ],
        }
    }
}
